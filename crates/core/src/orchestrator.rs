use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, QueryError};
use crate::models::{Metadata, QueryFilters, RetrievalContext, SearchHit};
use crate::preprocess::TextPreprocessor;
use crate::retrieval::RetrievalService;
use crate::store::SearchRequest;
use crate::synthesis::{AnswerSynthesizer, ChatCompletion};
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub results: Vec<SearchHit>,
}

pub struct QueryOrchestrator<V, C, E>
where
    V: VectorIndex,
    C: ChatCompletion,
    E: Embedder,
{
    retrieval: RetrievalService<V>,
    synthesizer: AnswerSynthesizer<C>,
    embedder: E,
    preprocessor: TextPreprocessor,
}

impl<V, C, E> QueryOrchestrator<V, C, E>
where
    V: VectorIndex,
    C: ChatCompletion,
    E: Embedder,
{
    pub fn new(
        retrieval: RetrievalService<V>,
        synthesizer: AnswerSynthesizer<C>,
        embedder: E,
        preprocessor: TextPreprocessor,
    ) -> Self {
        Self {
            retrieval,
            synthesizer,
            embedder,
            preprocessor,
        }
    }

    pub fn retrieval(&self) -> &RetrievalService<V> {
        &self.retrieval
    }

    pub async fn answer_query(
        &self,
        query: Option<&str>,
        payload: Option<SearchRequest>,
    ) -> Result<QueryResponse, QueryError> {
        let query = query
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .ok_or_else(|| QueryError::MissingInput("query is required".to_string()))?;
        let payload = payload
            .filter(|payload| !payload.is_empty())
            .ok_or_else(|| QueryError::MissingInput("searchPayload is required".to_string()))?;

        let hits = self.retrieval.search_request(&payload).await?;
        Ok(self.respond(query, hits).await)
    }

    pub async fn answer_text(
        &self,
        query: &str,
        filters: &QueryFilters,
        top_k: usize,
    ) -> Result<QueryResponse, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::MissingInput("query is required".to_string()));
        }
        if top_k == 0 {
            return Err(QueryError::MissingInput("top_k must be greater than zero".to_string()));
        }

        let query_vector = self.embed_normalized(query).await?;
        let hits = self
            .retrieval
            .search(query_vector, Some(query), filters, top_k)
            .await?;
        Ok(self.respond(query, hits).await)
    }

    pub async fn embed_text(&self, text: Option<&str>) -> Result<Vec<f32>, QueryError> {
        let text = text
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| QueryError::MissingInput("text is required".to_string()))?;
        self.embed_normalized(text).await
    }

    async fn embed_normalized(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        let normalized = self.preprocessor.normalize(text);
        let input = if normalized.is_empty() { text } else { normalized.as_str() };

        let vector = self.embedder.embed(input).await?;
        if vector.len() != self.embedder.dimensions() {
            return Err(QueryError::Embedding(EmbeddingError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: vector.len(),
            }));
        }
        Ok(vector)
    }

    async fn respond(&self, query: &str, hits: Vec<SearchHit>) -> QueryResponse {
        let records = structured_records(&hits);
        info!(hits = hits.len(), records = records.len(), "answering query");

        let context = RetrievalContext { hits, records };
        let answer = self.synthesizer.synthesize(query, &context).await;

        QueryResponse {
            answer: answer.answer,
            sources: answer.sources,
            results: context.hits,
        }
    }
}

pub fn structured_records(hits: &[SearchHit]) -> Vec<Metadata> {
    hits.iter()
        .filter_map(|hit| match hit.structured_record() {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(hit = %hit.id, %error, "hit metadata is not a structured record");
                None
            }
        })
        .collect()
}
