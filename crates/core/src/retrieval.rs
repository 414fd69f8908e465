use crate::error::SearchError;
use crate::models::{QueryFilters, SearchHit};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::SearchRequest;
use crate::traits::VectorIndex;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 3;

pub struct RetrievalService<V>
where
    V: VectorIndex,
{
    index: V,
    retry: RetryPolicy,
}

impl<V> RetrievalService<V>
where
    V: VectorIndex,
{
    pub fn new(index: V, retry: RetryPolicy) -> Self {
        Self { index, retry }
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        query_text: Option<&str>,
        filters: &QueryFilters,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if top_k == 0 {
            return Err(SearchError::Request("top_k must be greater than zero".to_string()));
        }
        if query_vector.is_empty() {
            return Err(SearchError::Request("query vector is empty".to_string()));
        }

        let request = SearchRequest::hybrid(query_vector, query_text, filters, top_k);
        let mut hits = self.search_request(&request).await?;
        hits.truncate(top_k);
        Ok(hits)
    }

    pub async fn search_request(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SearchError> {
        if request.is_empty() {
            return Err(SearchError::Request(
                "search request has neither vector queries nor search text".to_string(),
            ));
        }

        let mut hits = with_retry("search", &self.retry, || self.index.search(request)).await?;
        hits.sort_by(|left, right| right.relevance().total_cmp(&left.relevance()));

        debug!(hits = hits.len(), filter = ?request.filter, "retrieved");
        Ok(hits)
    }
}
