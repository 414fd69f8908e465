pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod eval;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod preprocess;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod stores;
pub mod synthesis;
pub mod traits;

pub use chunking::{chunk_by_paragraph, chunk_document, chunk_text, ChunkStrategy};
pub use config::ServiceConfig;
pub use embeddings::{verify_dimension, CharacterNgramEmbedder, Embedder, OpenAiEmbedder};
pub use error::{ChatError, EmbeddingError, IngestError, QueryError, SearchError};
pub use eval::{evaluate, load_golden_set, write_results, EvalCase, EvalOutcome, EvalSummary};
pub use index::{IndexManager, IndexSchema, IndexState, SimilarityAlgorithm};
pub use ingest::Ingestor;
pub use loader::{load_csv_folder, load_pdf_folder, LoadReport, LopdfExtractor, PdfExtractor};
pub use models::{
    AnswerResult, Chunk, DocType, Document, IndexedRecord, IngestionOptions, IngestionReport,
    Metadata, QueryFilters, RetrievalContext, Scalar, SearchHit,
};
pub use orchestrator::{QueryOrchestrator, QueryResponse};
pub use preprocess::{PreprocessOptions, TextPreprocessor};
pub use retrieval::RetrievalService;
pub use retry::RetryPolicy;
pub use store::SearchRequest;
pub use stores::AzureSearchStore;
pub use synthesis::{AnswerSynthesizer, ChatCompletion, OpenAiChat, PromptTemplate};
pub use traits::{DocumentSink, IndexAdmin, VectorIndex};
