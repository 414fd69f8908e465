use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use rag_search_core::{
    ChatCompletion, Embedder, QueryError, QueryOrchestrator, QueryResponse, SearchRequest,
    VectorIndex,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{embed_handler, health_handler, search_handler};

pub(crate) const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576;

/// The query operations the HTTP surface exposes.
#[async_trait]
pub(crate) trait SearchApi: Send + Sync {
    async fn answer_query(
        &self,
        query: Option<&str>,
        payload: Option<SearchRequest>,
    ) -> Result<QueryResponse, QueryError>;

    async fn embed_text(&self, text: Option<&str>) -> Result<Vec<f32>, QueryError>;
}

#[async_trait]
impl<V, C, E> SearchApi for QueryOrchestrator<V, C, E>
where
    V: VectorIndex,
    C: ChatCompletion,
    E: Embedder,
{
    async fn answer_query(
        &self,
        query: Option<&str>,
        payload: Option<SearchRequest>,
    ) -> Result<QueryResponse, QueryError> {
        QueryOrchestrator::answer_query(self, query, payload).await
    }

    async fn embed_text(&self, text: Option<&str>) -> Result<Vec<f32>, QueryError> {
        QueryOrchestrator::embed_text(self, text).await
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub api: Arc<dyn SearchApi>,
    pub started_at: DateTime<Utc>,
}

pub(crate) fn build_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/search", post(search_handler))
        .route("/api/embed", post(embed_handler))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until ctrl-c.
pub(crate) async fn serve(
    api: Arc<dyn SearchApi>,
    bind: &str,
    port: u16,
    max_body_size: usize,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;
    if bind == "0.0.0.0" {
        tracing::warn!("binding to all interfaces");
    }

    let state = AppState {
        api,
        started_at: Utc::now(),
    };
    let router = build_router(state, max_body_size);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("api shutting down");
        })
        .await
        .context("api server failed")?;

    Ok(())
}
