use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("search service error: {0}")]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding input is empty")]
    InvalidInput,

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding response contained no vector")]
    EmptyResponse,

    #[error("embedding response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(error: reqwest::Error) -> Self {
        Self::ProviderUnavailable(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("retrieval failed with status {status}: {message}")]
    RetrievalFailed { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("index setup failed with status {status}: {message}")]
    IndexSetup { status: u16, message: String },

    #[error("upload rejected with status {status}: {message}")]
    UploadFailed { status: u16, message: String },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat provider unavailable: {0}")]
    Unavailable(String),

    #[error("chat provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("chat response contained no choices")]
    EmptyResponse,

    #[error("chat response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(error: reqwest::Error) -> Self {
        Self::Unavailable(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    MissingInput(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Retrieval(#[from] SearchError),
}

impl QueryError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingInput(_) => 400,
            Self::Embedding(EmbeddingError::InvalidInput) => 400,
            Self::Embedding(_) => 502,
            Self::Retrieval(SearchError::RetrievalFailed { status, .. }) => *status,
            Self::Retrieval(SearchError::Http(_)) => 503,
            Self::Retrieval(_) => 500,
        }
    }
}

/// Errors that may succeed when the same call is repeated.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

fn transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RetrievalFailed { status, .. }
            | Self::UploadFailed { status, .. }
            | Self::IndexSetup { status, .. } => transient_status(*status),
            Self::Http(_) => true,
            _ => false,
        }
    }
}

impl Retryable for ChatError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub(crate) fn embedding_status_error(status: u16, message: String) -> EmbeddingError {
    if transient_status(status) {
        EmbeddingError::ProviderUnavailable(format!("status {status}: {message}"))
    } else {
        EmbeddingError::Rejected { status, message }
    }
}

pub(crate) fn chat_status_error(status: u16, message: String) -> ChatError {
    if transient_status(status) {
        ChatError::Unavailable(format!("status {status}: {message}"))
    } else {
        ChatError::Rejected { status, message }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieval_status_is_passed_through() {
        let error = QueryError::Retrieval(SearchError::RetrievalFailed {
            status: 403,
            message: "forbidden".to_string(),
        });
        assert_eq!(error.status_code(), 403);
        assert_eq!(QueryError::MissingInput("no query".into()).status_code(), 400);
    }

    #[test]
    fn only_transient_statuses_are_retryable() {
        let throttled = SearchError::RetrievalFailed {
            status: 429,
            message: String::new(),
        };
        let bad_request = SearchError::RetrievalFailed {
            status: 400,
            message: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(embedding_status_error(503, "busy".into()).is_retryable());
        assert!(!embedding_status_error(401, "denied".into()).is_retryable());
        assert!(!EmbeddingError::InvalidInput.is_retryable());
    }
}
