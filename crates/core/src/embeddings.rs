use crate::config::ServiceConfig;
use crate::error::{embedding_status_error, EmbeddingError, IngestError};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;

const DIMENSION_SAMPLE: &str = "embedding dimension check";

/// Text → vector for one fixed model. Implementations must return vectors of
/// exactly [`dimensions`](Embedder::dimensions) floats.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub async fn verify_dimension<E>(embedder: &E, expected: usize) -> Result<(), IngestError>
where
    E: Embedder + ?Sized,
{
    if embedder.dimensions() != expected {
        return Err(IngestError::InvalidConfiguration(format!(
            "embedder {} declares dimension {} but the index expects {}",
            embedder.model(),
            embedder.dimensions(),
            expected
        )));
    }

    let sample = match embedder.embed(DIMENSION_SAMPLE).await {
        Ok(sample) => sample,
        Err(EmbeddingError::DimensionMismatch { actual, .. }) => {
            return Err(IngestError::InvalidConfiguration(format!(
                "embedder {} produced {} dimensions but the index expects {}",
                embedder.model(),
                actual,
                expected
            )))
        }
        Err(error) => return Err(error.into()),
    };
    if sample.len() != expected {
        return Err(IngestError::InvalidConfiguration(format!(
            "embedder {} produced {} dimensions but the index expects {}",
            embedder.model(),
            sample.len(),
            expected
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        "char-trigram"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput);
        }

        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_key.clone(),
            model: config.embed_model.clone(),
            dimensions: config.embed_dim,
            retry: config.retry,
        })
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: text,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), model = %self.model, "embedding request failed");
            return Err(embedding_status_error(status.as_u16(), body));
        }

        let payload: EmbeddingResponse = serde_json::from_str(&body)?;
        payload
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or(EmbeddingError::EmptyResponse)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput);
        }

        let vector = with_retry("embed", &self.retry, || self.request_embedding(text)).await?;
        if vector.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
