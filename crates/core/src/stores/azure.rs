use crate::config::ServiceConfig;
use crate::index::IndexSchema;
use crate::models::{IndexedRecord, SearchHit};
use crate::store::{DeleteOutcome, RecordFailure, SearchRequest};
use crate::traits::{DocumentSink, IndexAdmin, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Clone)]
pub struct AzureSearchStore {
    client: Client,
    endpoint: Url,
    api_key: String,
    api_version: String,
    index_name: String,
}

impl fmt::Debug for AzureSearchStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSearchStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("index_name", &self.index_name)
            .finish()
    }
}

#[derive(Serialize)]
struct UploadAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    #[serde(flatten)]
    record: &'a IndexedRecord,
}

#[derive(Serialize)]
struct UploadBatch<'a> {
    value: Vec<UploadAction<'a>>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(default)]
    value: Vec<UploadItemResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadItemResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchHit>,
}

impl AzureSearchStore {
    pub fn from_config(config: &ServiceConfig) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.search_endpoint.clone(),
            api_key: config.search_api_key.clone(),
            api_version: config.search_api_version.clone(),
            index_name: config.index_name.clone(),
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SearchError::Request(format!("endpoint {} cannot carry a path", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl IndexAdmin for AzureSearchStore {
    async fn delete_index(&self, name: &str) -> Result<DeleteOutcome, SearchError> {
        let url = self.url(&["indexes", name])?;
        let response = self.authorized(self.client.delete(url)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            status => Err(SearchError::IndexSetup {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), SearchError> {
        let url = self.url(&["indexes", &schema.name])?;
        let response = self
            .authorized(self.client.put(url))
            .json(schema)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::IndexSetup {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for AzureSearchStore {
    async fn upload_records(
        &self,
        records: &[IndexedRecord],
    ) -> Result<Vec<RecordFailure>, SearchError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let batch = UploadBatch {
            value: records
                .iter()
                .map(|record| UploadAction {
                    action: "upload",
                    record,
                })
                .collect(),
        };

        let url = self.url(&["indexes", &self.index_name, "docs", "index"])?;
        let response = self
            .authorized(self.client.post(url))
            .json(&batch)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // 207 is a partially applied batch; per-key results tell which records failed.
        if !status.is_success() {
            return Err(SearchError::UploadFailed {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: UploadResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .value
            .into_iter()
            .filter(|item| !item.status)
            .map(|item| RecordFailure {
                status: item.status_code,
                message: match (item.status_code, item.error_message) {
                    (Some(code), Some(message)) => format!("status {code}: {message}"),
                    (Some(code), None) => format!("status {code}"),
                    (None, Some(message)) => message,
                    (None, None) => "rejected by search service".to_string(),
                },
                key: item.key,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for AzureSearchStore {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SearchError> {
        let url = self.url(&["indexes", &self.index_name, "docs", "search"])?;
        tracing::debug!(
            index = %self.index_name,
            vector_queries = request.vector_queries.len(),
            top = ?request.top,
            "search request"
        );

        let response = self
            .authorized(self.client.post(url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SearchError::RetrievalFailed {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: SearchResponse = serde_json::from_str(&body)?;
        Ok(parsed.value)
    }
}
