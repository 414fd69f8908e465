use crate::models::QueryFilters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const VECTOR_FIELD: &str = "contentVector";
pub const DEFAULT_SELECT: &str = "id, content, source, metadata";

// Body of a search call. Fields this crate does not model (`queryType`,
// `semanticConfiguration`, ...) are kept in `extra` and sent back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector_queries: Vec<VectorQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SearchRequest {
    pub fn hybrid(
        query_vector: Vec<f32>,
        query_text: Option<&str>,
        filters: &QueryFilters,
        top_k: usize,
    ) -> Self {
        Self {
            search: query_text
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            vector_queries: vec![VectorQuery::new(query_vector, top_k)],
            filter: filters.to_odata(),
            top: Some(top_k),
            select: Some(DEFAULT_SELECT.to_string()),
            extra: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vector_queries.is_empty()
            && self
                .search
                .as_deref()
                .map_or(true, |text| text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub kind: String,
    pub vector: Vec<f32>,
    pub k: usize,
    pub fields: String,
    #[serde(default)]
    pub exhaustive: bool,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            kind: "vector".to_string(),
            vector,
            k,
            fields: VECTOR_FIELD.to_string(),
            exhaustive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub key: String,
    pub status: Option<u16>,
    pub message: String,
}

impl RecordFailure {
    // Per-record throttling inside a 207; the record itself was fine.
    pub fn is_throttled(&self) -> bool {
        matches!(self.status, Some(429 | 503))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocType;
    use serde_json::json;

    #[test]
    fn hybrid_request_uses_wire_names() {
        let filters = QueryFilters {
            source: None,
            doc_type: Some(DocType::Pdf),
        };
        let request = SearchRequest::hybrid(vec![0.1, 0.2], Some("refunds"), &filters, 3);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["search"], "refunds");
        assert_eq!(value["top"], 3);
        assert_eq!(value["filter"], "doc_type eq 'pdf'");
        assert_eq!(value["vectorQueries"][0]["fields"], "contentVector");
        assert_eq!(value["vectorQueries"][0]["k"], 3);
    }

    #[test]
    fn client_payload_keeps_unmodelled_fields() {
        let payload = json!({
            "vectorQueries": [{
                "kind": "vector",
                "vector": [0.5, 0.5],
                "k": 3,
                "fields": "contentVector",
                "exhaustive": true
            }],
            "select": "id, content, source, metadata",
            "queryType": "semantic",
            "semanticConfiguration": "my-semantic-config"
        });

        let request: SearchRequest = serde_json::from_value(payload.clone()).unwrap();
        assert!(request.vector_queries[0].exhaustive);
        assert_eq!(request.extra["queryType"], "semantic");
        assert_eq!(serde_json::to_value(&request).unwrap(), payload);
    }

    #[test]
    fn blank_text_without_vectors_is_empty() {
        let request = SearchRequest {
            search: Some("  ".to_string()),
            ..SearchRequest::default()
        };
        assert!(request.is_empty());
    }
}
