use crate::chunking::ChunkStrategy;
use crate::error::IngestError;
use crate::preprocess::PreprocessOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        // Identifiers such as "00742" keep their leading zeros.
        let leading_zero = trimmed.len() > 1
            && trimmed.starts_with('0')
            && !trimmed.starts_with("0.");
        if !leading_zero {
            if let Ok(value) = trimmed.parse::<i64>() {
                return Self::Integer(value);
            }
            if let Ok(value) = trimmed.parse::<f64>() {
                if value.is_finite() {
                    return Self::Float(value);
                }
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

pub type Metadata = BTreeMap<String, Scalar>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Csv,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub source: String,
    pub doc_type: DocType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Metadata,
    pub source: String,
    pub doc_type: DocType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: String,
    pub content: String,
    #[serde(rename = "contentVector")]
    pub content_vector: Vec<f32>,
    pub source: String,
    pub doc_type: DocType,
    pub metadata: String,
}

impl IndexedRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: chunk.id.clone(),
            content: chunk.content.clone(),
            content_vector: vector,
            source: chunk.source.clone(),
            doc_type: chunk.doc_type,
            metadata: serde_json::to_string(&chunk.metadata)?,
        })
    }
}

// One document from the service's `value` array. Fields the caller did not
// `select` default to empty; anything unmodelled (captions, highlights) rides in
// `extra` so the raw hit reaches the client intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(rename = "@search.score", default)]
    pub score: f64,
    #[serde(
        rename = "@search.rerankerScore",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reranker_score: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SearchHit {
    pub fn relevance(&self) -> f64 {
        self.reranker_score.unwrap_or(self.score)
    }

    pub fn structured_record(&self) -> Result<Metadata, serde_json::Error> {
        if self.metadata.trim().is_empty() {
            return Ok(Metadata::new());
        }
        serde_json::from_str(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
    pub source: Option<String>,
    pub doc_type: Option<DocType>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.doc_type.is_none()
    }

    pub fn to_odata(&self) -> Option<String> {
        let mut predicates = Vec::new();
        if let Some(source) = &self.source {
            predicates.push(format!("source eq '{}'", source.replace('\'', "''")));
        }
        if let Some(doc_type) = self.doc_type {
            predicates.push(format!("doc_type eq '{doc_type}'"));
        }
        if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" and "))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    pub hits: Vec<SearchHit>,
    pub records: Vec<Metadata>,
}

impl RetrievalContext {
    pub fn chunks_text(&self) -> String {
        let mut text = String::new();
        for hit in &self.hits {
            text.push_str(&format!("Document ID: {}\n", hit.id));
            text.push_str(&format!("Content: {}\n", hit.content));
            text.push_str(&format!("Source: {}\n\n", hit.source));
        }
        text
    }

    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !hit.source.is_empty() && !sources.contains(&hit.source) {
                sources.push(hit.source.clone());
            }
        }
        sources
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub doc_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub succeeded: usize,
    pub records_written: usize,
    pub failed: Vec<FailedDocument>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_strategy: ChunkStrategy,
    pub upload_batch_size: usize,
    pub embed_concurrency: usize,
    pub csv_text_field: String,
    pub preprocess: PreprocessOptions,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_strategy: ChunkStrategy::Fixed,
            upload_batch_size: 500,
            embed_concurrency: 4,
            csv_text_field: "description".to_string(),
            preprocess: PreprocessOptions::default(),
        }
    }
}

impl IngestionOptions {
    pub const MAX_UPLOAD_BATCH: usize = 1_000;

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_max_chars == 0 {
            return Err(IngestError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.upload_batch_size == 0 || self.upload_batch_size > Self::MAX_UPLOAD_BATCH {
            return Err(IngestError::InvalidConfiguration(format!(
                "upload batch size must be between 1 and {}, got {}",
                Self::MAX_UPLOAD_BATCH,
                self.upload_batch_size
            )));
        }
        if self.embed_concurrency == 0 {
            return Err(IngestError::InvalidConfiguration(
                "embedding concurrency must be greater than zero".to_string(),
            ));
        }
        if self.csv_text_field.trim().is_empty() {
            return Err(IngestError::InvalidConfiguration(
                "csv text field must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
