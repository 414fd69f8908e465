use crate::error::IngestError;
use crate::retry::RetryPolicy;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_INDEX_NAME: &str = "rag-demo-index";
pub const DEFAULT_SEARCH_API_VERSION: &str = "2023-10-01-Preview";
pub const DEFAULT_EMBED_DIM: usize = 1536;
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct ServiceConfig {
    pub search_endpoint: Url,
    pub search_api_key: String,
    pub index_name: String,
    pub search_api_version: String,
    pub embed_dim: usize,
    pub embed_model: String,
    pub openai_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("search_endpoint", &self.search_endpoint.as_str())
            .field("search_api_key", &"<redacted>")
            .field("index_name", &self.index_name)
            .field("search_api_version", &self.search_api_version)
            .field("embed_dim", &self.embed_dim)
            .field("embed_model", &self.embed_model)
            .field("openai_key", &"<redacted>")
            .field("openai_base_url", &self.openai_base_url)
            .field("chat_model", &self.chat_model)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.embed_dim == 0 {
            return Err(invalid("embed_dim must be greater than zero"));
        }
        if self.index_name.trim().is_empty() {
            return Err(invalid("index_name must not be empty"));
        }
        if self.search_api_key.trim().is_empty() {
            return Err(invalid("search api key is missing"));
        }
        if self.search_api_version.trim().is_empty() {
            return Err(invalid("search api version must not be empty"));
        }
        if self.embed_model.trim().is_empty() {
            return Err(invalid("embedding model must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request timeout must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry policy needs at least one attempt"));
        }
        Ok(())
    }

    pub fn validate_with_provider(&self) -> Result<(), IngestError> {
        self.validate()?;
        if self.openai_key.trim().is_empty() {
            return Err(invalid("openai api key is missing"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> IngestError {
    IngestError::InvalidConfiguration(message.to_string())
}

#[cfg(test)]
pub(crate) fn test_config(endpoint: &str) -> ServiceConfig {
    ServiceConfig {
        search_endpoint: Url::parse(endpoint).expect("test endpoint should parse"),
        search_api_key: "search-key".to_string(),
        index_name: "test-index".to_string(),
        search_api_version: DEFAULT_SEARCH_API_VERSION.to_string(),
        embed_dim: 8,
        embed_model: DEFAULT_EMBED_MODEL.to_string(),
        openai_key: "openai-key".to_string(),
        openai_base_url: endpoint.trim_end_matches('/').to_string(),
        chat_model: DEFAULT_CHAT_MODEL.to_string(),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_invalid_configuration() {
        let mut config = test_config("http://localhost:9");
        config.embed_dim = 0;
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn missing_provider_key_fails_only_provider_validation() {
        let mut config = test_config("http://localhost:9");
        config.openai_key = "  ".to_string();
        assert!(config.validate().is_ok());
        assert!(config.validate_with_provider().is_err());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = test_config("http://localhost:9");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("search-key"));
        assert!(!rendered.contains("openai-key"));
    }
}
