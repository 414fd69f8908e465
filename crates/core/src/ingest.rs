use crate::chunking::chunk_document;
use crate::config::ServiceConfig;
use crate::embeddings::{verify_dimension, Embedder};
use crate::error::{EmbeddingError, IngestError, SearchError};
use crate::index::{IndexManager, IndexSchema};
use crate::models::{Document, FailedDocument, IndexedRecord, IngestionOptions, IngestionReport};
use crate::preprocess::TextPreprocessor;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::RecordFailure;
use crate::traits::{DocumentSink, IndexAdmin};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub struct Ingestor<E, S>
where
    E: Embedder,
    S: DocumentSink,
{
    embedder: E,
    sink: S,
    preprocessor: TextPreprocessor,
    options: IngestionOptions,
    embed_dim: usize,
    retry: RetryPolicy,
}

impl<E, S> Ingestor<E, S>
where
    E: Embedder,
    S: DocumentSink,
{
    pub fn new(
        embedder: E,
        sink: S,
        options: IngestionOptions,
        config: &ServiceConfig,
    ) -> Result<Self, IngestError> {
        options.validate()?;
        let preprocessor = TextPreprocessor::new(options.preprocess.clone())?;

        Ok(Self {
            embedder,
            sink,
            preprocessor,
            options,
            embed_dim: config.embed_dim,
            retry: config.retry,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn preflight(&self) -> Result<(), IngestError> {
        verify_dimension(&self.embedder, self.embed_dim).await
    }

    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestionReport, IngestError> {
        self.preflight().await?;
        Ok(self.ingest_checked(documents).await)
    }

    // Dimension checks run before the old index is deleted; uploads start only
    // after the new one is created.
    pub async fn rebuild<A>(
        &self,
        manager: &IndexManager<A>,
        schema: &IndexSchema,
        documents: &[Document],
    ) -> Result<IngestionReport, IngestError>
    where
        A: IndexAdmin,
    {
        if schema.vector_dimensions() != Some(self.embed_dim) {
            return Err(IngestError::InvalidConfiguration(format!(
                "schema vector dimension {:?} does not match embedding dimension {}",
                schema.vector_dimensions(),
                self.embed_dim
            )));
        }
        self.preflight().await?;
        manager.recreate(schema).await?;
        Ok(self.ingest_checked(documents).await)
    }

    async fn ingest_checked(&self, documents: &[Document]) -> IngestionReport {
        info!(documents = documents.len(), "embedding documents");

        let prepared: Vec<(&Document, Result<Vec<IndexedRecord>, IngestError>)> =
            stream::iter(documents)
                .map(|document| async move { (document, self.prepare(document).await) })
                .buffered(self.options.embed_concurrency)
                .collect()
                .await;

        let mut failures: Vec<FailedDocument> = Vec::new();
        let mut failed_ids: HashSet<String> = HashSet::new();
        let mut embedded_ids: Vec<String> = Vec::new();
        let mut owners: Vec<String> = Vec::new();
        let mut records: Vec<IndexedRecord> = Vec::new();

        for (document, outcome) in prepared {
            match outcome {
                Ok(document_records) => {
                    embedded_ids.push(document.id.clone());
                    owners.extend(document_records.iter().map(|_| document.id.clone()));
                    records.extend(document_records);
                }
                Err(error) => {
                    warn!(doc_id = %document.id, source = %document.source, %error, "document failed");
                    failed_ids.insert(document.id.clone());
                    failures.push(FailedDocument {
                        doc_id: document.id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let owner_of: HashMap<&str, &str> = records
            .iter()
            .zip(owners.iter())
            .map(|(record, owner)| (record.id.as_str(), owner.as_str()))
            .collect();

        let mut records_written = 0usize;
        let batch_size = self.options.upload_batch_size;
        let batch_count = records.len().div_ceil(batch_size);

        for (batch_index, (batch, batch_owners)) in records
            .chunks(batch_size)
            .zip(owners.chunks(batch_size))
            .enumerate()
        {
            let outcome = self.upload_batch(batch).await;

            match outcome {
                Ok(rejected) => {
                    info!(
                        batch = batch_index + 1,
                        batches = batch_count,
                        records = batch.len(),
                        rejected = rejected.len(),
                        "uploaded batch"
                    );
                    records_written += batch.len().saturating_sub(rejected.len());
                    for failure in rejected {
                        let Some(owner) = owner_of.get(failure.key.as_str()) else {
                            continue;
                        };
                        if failed_ids.insert(owner.to_string()) {
                            failures.push(FailedDocument {
                                doc_id: owner.to_string(),
                                reason: format!("record {} rejected: {}", failure.key, failure.message),
                            });
                        }
                    }
                }
                Err(error) => {
                    warn!(batch = batch_index + 1, %error, "upload batch failed");
                    for owner in batch_owners {
                        if failed_ids.insert(owner.clone()) {
                            failures.push(FailedDocument {
                                doc_id: owner.clone(),
                                reason: format!("upload failed: {error}"),
                            });
                        }
                    }
                }
            }
        }

        let succeeded = embedded_ids
            .iter()
            .filter(|id| !failed_ids.contains(id.as_str()))
            .count();

        info!(
            succeeded,
            failed = failures.len(),
            records_written,
            "ingestion finished"
        );

        IngestionReport {
            succeeded,
            records_written,
            failed: failures,
        }
    }

    async fn upload_batch(&self, batch: &[IndexedRecord]) -> Result<Vec<RecordFailure>, SearchError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut failures = Vec::new();
        let mut pending = with_retry("upload_records", &self.retry, || {
            self.sink.upload_records(batch)
        })
        .await?;
        let mut attempt = 0;

        loop {
            let (throttled, permanent): (Vec<RecordFailure>, Vec<RecordFailure>) =
                pending.into_iter().partition(RecordFailure::is_throttled);
            failures.extend(permanent);
            if throttled.is_empty() || attempt + 1 >= attempts {
                failures.extend(throttled);
                return Ok(failures);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                records = throttled.len(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "records throttled, resending"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            let keys: HashSet<&str> = throttled.iter().map(|failure| failure.key.as_str()).collect();
            let resend: Vec<IndexedRecord> = batch
                .iter()
                .filter(|record| keys.contains(record.id.as_str()))
                .cloned()
                .collect();
            pending = match with_retry("upload_records", &self.retry, || {
                self.sink.upload_records(&resend)
            })
            .await
            {
                Ok(rejected) => rejected,
                Err(error) => throttled
                    .into_iter()
                    .map(|failure| RecordFailure {
                        status: None,
                        message: format!("resend failed: {error}"),
                        ..failure
                    })
                    .collect(),
            };
        }
    }

    async fn prepare(&self, document: &Document) -> Result<Vec<IndexedRecord>, IngestError> {
        let chunks = chunk_document(
            document,
            self.options.chunk_max_chars,
            self.options.chunk_strategy,
        )?;
        if chunks.is_empty() {
            return Err(IngestError::Embedding(EmbeddingError::InvalidInput));
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let normalized = self.preprocessor.normalize(&chunk.content);
            // A chunk made only of stopwords still gets a vector from its raw text.
            let input = if normalized.is_empty() {
                chunk.content.trim()
            } else {
                normalized.as_str()
            };

            let vector = self.embedder.embed(input).await?;
            if vector.len() != self.embed_dim {
                return Err(IngestError::Embedding(EmbeddingError::DimensionMismatch {
                    expected: self.embed_dim,
                    actual: vector.len(),
                }));
            }

            let record = IndexedRecord::from_chunk(chunk, vector)
                .map_err(|error| IngestError::Schema(error.to_string()))?;
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::index::SimilarityAlgorithm;
    use crate::models::{DocType, Metadata};
    use crate::store::{DeleteOutcome, RecordFailure};
    use crate::SearchError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DIM: usize = 8;

    // Fails for any text containing "unreachable".
    struct FlakyEmbedder {
        dimensions: usize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn model(&self) -> &str {
            "fake"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("unreachable") {
                return Err(EmbeddingError::ProviderUnavailable("connection reset".into()));
            }
            Ok(vec![0.5; self.dimensions])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<IndexedRecord>>>,
        reject_content: Option<&'static str>,
        // Any batch holding this content fails as a whole with a 503.
        fail_batch_with: Option<&'static str>,
        // Records with this content are throttled this many times before landing.
        throttle: Option<(&'static str, u32)>,
        throttled: Mutex<u32>,
        events: Option<std::sync::Arc<Mutex<Vec<String>>>>,
    }

    #[async_trait]
    impl DocumentSink for RecordingSink {
        async fn upload_records(
            &self,
            records: &[IndexedRecord],
        ) -> Result<Vec<RecordFailure>, SearchError> {
            if let Some(events) = &self.events {
                events.lock().unwrap().push("upload".to_string());
            }
            self.batches.lock().unwrap().push(records.to_vec());

            let holds = |content: &str| records.iter().any(|record| record.content == content);
            if self.fail_batch_with.is_some_and(holds) {
                return Err(SearchError::UploadFailed {
                    status: 503,
                    message: "service unavailable".to_string(),
                });
            }

            let mut failures = Vec::new();
            for record in records {
                if Some(record.content.as_str()) == self.reject_content {
                    failures.push(RecordFailure {
                        key: record.id.clone(),
                        status: Some(400),
                        message: "invalid".to_string(),
                    });
                }
                if let Some((content, times)) = self.throttle {
                    let mut throttled = self.throttled.lock().unwrap();
                    if record.content == content && *throttled < times {
                        *throttled += 1;
                        failures.push(RecordFailure {
                            key: record.id.clone(),
                            status: Some(503),
                            message: "throttled".to_string(),
                        });
                    }
                }
            }
            Ok(failures)
        }
    }

    fn document(id: &str, content: &str) -> Document {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), "f.csv".into());
        Document {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
            source: "f.csv".to_string(),
            doc_type: DocType::Csv,
        }
    }

    fn ingestor(sink: RecordingSink, options: IngestionOptions) -> Ingestor<FlakyEmbedder, RecordingSink> {
        let mut config = test_config("http://localhost:9");
        config.embed_dim = DIM;
        Ingestor::new(FlakyEmbedder { dimensions: DIM }, sink, options, &config).unwrap()
    }

    #[tokio::test]
    async fn one_failing_document_does_not_abort_the_batch() {
        let documents = vec![
            document("d1", "blue kettle"),
            document("d2", "red toaster"),
            document("d3", "unreachable provider"),
            document("d4", "green mug"),
            document("d5", "steel pan"),
        ];

        let ingestor = ingestor(RecordingSink::default(), IngestionOptions::default());
        let report = ingestor.ingest(&documents).await.unwrap();

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.records_written, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].doc_id, "d3");
        assert!(report.failed[0].reason.contains("connection reset"));
    }

    #[tokio::test]
    async fn uploads_are_split_into_bounded_batches() {
        let documents: Vec<_> = (0..5)
            .map(|index| document(&format!("d{index}"), "A B C D"))
            .collect();
        let options = IngestionOptions {
            chunk_max_chars: 3,
            upload_batch_size: 4,
            ..IngestionOptions::default()
        };

        let ingestor = ingestor(RecordingSink::default(), options);
        let report = ingestor.ingest(&documents).await.unwrap();

        let batches = ingestor.sink().batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 4, 3]);
        assert_eq!(report.records_written, 15);
        assert_eq!(report.succeeded, 5);
        assert!(batches.iter().flatten().all(|record| record.content_vector.len() == DIM));
    }

    #[tokio::test]
    async fn rejected_records_fail_their_owning_document() {
        let sink = RecordingSink {
            reject_content: Some("red toaster"),
            ..RecordingSink::default()
        };
        let documents = vec![document("d1", "blue kettle"), document("d2", "red toaster")];

        let report = ingestor(sink, IngestionOptions::default())
            .ingest(&documents)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.failed[0].doc_id, "d2");
    }

    #[tokio::test]
    async fn failed_batch_fails_every_owner_and_keeps_earlier_batches() {
        let sink = RecordingSink {
            fail_batch_with: Some("green mug"),
            ..RecordingSink::default()
        };
        let options = IngestionOptions {
            upload_batch_size: 2,
            ..IngestionOptions::default()
        };
        let documents = vec![
            document("d1", "blue kettle"),
            document("d2", "red toaster"),
            document("d3", "green mug"),
            document("d4", "steel pan"),
        ];

        let ingestor = ingestor(sink, options);
        let report = ingestor.ingest(&documents).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.records_written, 2);
        let failed: Vec<&str> = report.failed.iter().map(|failure| failure.doc_id.as_str()).collect();
        assert_eq!(failed, vec!["d3", "d4"]);
        assert!(report
            .failed
            .iter()
            .all(|failure| failure.reason.starts_with("upload failed: upload rejected with status 503")));
        // first batch once, second batch three times under the retry policy
        assert_eq!(ingestor.sink().batches.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn throttled_records_are_resent_alone() {
        let sink = RecordingSink {
            throttle: Some(("red toaster", 1)),
            ..RecordingSink::default()
        };
        let documents = vec![document("d1", "blue kettle"), document("d2", "red toaster")];

        let ingestor = ingestor(sink, IngestionOptions::default());
        let report = ingestor.ingest(&documents).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.records_written, 2);
        assert!(report.failed.is_empty());
        let batches = ingestor.sink().batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1][0].content, "red toaster");
    }

    #[tokio::test]
    async fn records_still_throttled_after_the_last_attempt_fail() {
        let sink = RecordingSink {
            throttle: Some(("red toaster", 10)),
            ..RecordingSink::default()
        };
        let documents = vec![document("d1", "blue kettle"), document("d2", "red toaster")];

        let ingestor = ingestor(sink, IngestionOptions::default());
        let report = ingestor.ingest(&documents).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.failed[0].doc_id, "d2");
        assert_eq!(ingestor.sink().batches.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dimension_mismatch_stops_before_any_upload() {
        let mut config = test_config("http://localhost:9");
        config.embed_dim = DIM;
        let ingestor = Ingestor::new(
            FlakyEmbedder { dimensions: DIM + 1 },
            RecordingSink::default(),
            IngestionOptions::default(),
            &config,
        )
        .unwrap();

        let result = ingestor.ingest(&[document("d1", "blue kettle")]).await;
        assert!(matches!(result, Err(IngestError::InvalidConfiguration(_))));
        assert!(ingestor.sink().batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_carry_serialized_parent_metadata() {
        let ingestor = ingestor(RecordingSink::default(), IngestionOptions::default());
        let source = document("d1", "blue kettle");
        ingestor.ingest(&[source.clone()]).await.unwrap();

        let batches = ingestor.sink().batches.lock().unwrap();
        let record = &batches[0][0];
        let restored: Metadata = serde_json::from_str(&record.metadata).unwrap();
        assert_eq!(restored, source.metadata);
        assert_eq!(record.source, "f.csv");
        assert_eq!(record.content, "blue kettle");
    }

    #[test]
    fn invalid_batch_size_is_rejected_at_construction() {
        let options = IngestionOptions {
            upload_batch_size: 0,
            ..IngestionOptions::default()
        };
        let config = test_config("http://localhost:9");
        let result = Ingestor::new(
            FlakyEmbedder { dimensions: 8 },
            RecordingSink::default(),
            options,
            &config,
        );
        assert!(matches!(result, Err(IngestError::InvalidConfiguration(_))));
    }

    struct SequencedAdmin {
        events: std::sync::Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl IndexAdmin for SequencedAdmin {
        async fn delete_index(&self, _name: &str) -> Result<DeleteOutcome, SearchError> {
            self.events.lock().unwrap().push("delete".to_string());
            Ok(DeleteOutcome::NotFound)
        }

        async fn create_index(&self, _schema: &IndexSchema) -> Result<(), SearchError> {
            self.events.lock().unwrap().push("create".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn rebuild_recreates_the_index_before_uploading() {
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            events: Some(events.clone()),
            ..RecordingSink::default()
        };
        let ingestor = ingestor(sink, IngestionOptions::default());
        let manager = IndexManager::new(
            SequencedAdmin {
                events: events.clone(),
            },
            RetryPolicy::default(),
        );
        let schema = IndexSchema::standard("docs", DIM, SimilarityAlgorithm::Hnsw);

        let report = ingestor
            .rebuild(&manager, &schema, &[document("d1", "blue kettle")])
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(*events.lock().unwrap(), vec!["delete", "create", "upload"]);
    }

    #[tokio::test]
    async fn rebuild_refuses_schema_with_other_dimension() {
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let ingestor = ingestor(RecordingSink::default(), IngestionOptions::default());
        let manager = IndexManager::new(
            SequencedAdmin {
                events: events.clone(),
            },
            RetryPolicy::default(),
        );
        let schema = IndexSchema::standard("docs", DIM * 2, SimilarityAlgorithm::Hnsw);

        let result = ingestor.rebuild(&manager, &schema, &[]).await;
        assert!(matches!(result, Err(IngestError::InvalidConfiguration(_))));
        assert!(events.lock().unwrap().is_empty());
    }
}
