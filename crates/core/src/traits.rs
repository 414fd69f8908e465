use crate::index::IndexSchema;
use crate::models::{IndexedRecord, SearchHit};
use crate::store::{DeleteOutcome, RecordFailure, SearchRequest};
use crate::SearchError;
use async_trait::async_trait;

/// Schema lifecycle of a named index.
#[async_trait]
pub trait IndexAdmin: Send + Sync {
    async fn delete_index(&self, name: &str) -> Result<DeleteOutcome, SearchError>;

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), SearchError>;
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Uploads one batch. `Ok` carries the records the service refused individually.
    async fn upload_records(
        &self,
        records: &[IndexedRecord],
    ) -> Result<Vec<RecordFailure>, SearchError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SearchError>;
}
