use crate::error::IngestError;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{DeleteOutcome, VECTOR_FIELD};
use crate::traits::IndexAdmin;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const VECTOR_PROFILE: &str = "my-vector-profile";
pub const HNSW_ALGORITHM: &str = "hnsw-config";
pub const EXHAUSTIVE_ALGORITHM: &str = "eknn-config";
pub const SEMANTIC_CONFIGURATION: &str = "my-semantic-config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityAlgorithm {
    #[default]
    Hnsw,
    ExhaustiveKnn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<IndexField>,
    pub vector_search: VectorSearchConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic: Option<SemanticSearch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub facetable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search_profile: Option<String>,
}

impl IndexField {
    fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: "Edm.String".to_string(),
            key: false,
            searchable: false,
            filterable: false,
            facetable: false,
            analyzer: None,
            dimensions: None,
            vector_search_profile: None,
        }
    }

    fn vector(name: &str, dimensions: usize, profile: &str) -> Self {
        Self {
            field_type: "Collection(Edm.Single)".to_string(),
            searchable: true,
            dimensions: Some(dimensions),
            vector_search_profile: Some(profile.to_string()),
            ..Self::text(name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    pub algorithms: Vec<VectorAlgorithm>,
    pub profiles: Vec<VectorProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorAlgorithm {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw_parameters: Option<HnswParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhaustive_knn_parameters: Option<ExhaustiveKnnParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HnswParameters {
    pub metric: String,
    pub m: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustiveKnnParameters {
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorProfile {
    pub name: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticSearch {
    pub configurations: Vec<SemanticConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticConfiguration {
    pub name: String,
    pub prioritized_fields: PrioritizedFields,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_field: Option<SemanticField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prioritized_content_fields: Vec<SemanticField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prioritized_keywords_fields: Vec<SemanticField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticField {
    pub field_name: String,
}

impl SemanticSearch {
    pub fn over_content() -> Self {
        Self {
            configurations: vec![SemanticConfiguration {
                name: SEMANTIC_CONFIGURATION.to_string(),
                prioritized_fields: PrioritizedFields {
                    prioritized_content_fields: vec![SemanticField {
                        field_name: "content".to_string(),
                    }],
                    ..PrioritizedFields::default()
                },
            }],
        }
    }
}

impl IndexSchema {
    pub fn standard(name: &str, dimensions: usize, algorithm: SimilarityAlgorithm) -> Self {
        let profile_algorithm = match algorithm {
            SimilarityAlgorithm::Hnsw => HNSW_ALGORITHM,
            SimilarityAlgorithm::ExhaustiveKnn => EXHAUSTIVE_ALGORITHM,
        };

        Self {
            name: name.to_string(),
            fields: vec![
                IndexField {
                    key: true,
                    filterable: true,
                    ..IndexField::text("id")
                },
                IndexField {
                    searchable: true,
                    analyzer: Some("en.lucene".to_string()),
                    ..IndexField::text("content")
                },
                IndexField {
                    searchable: true,
                    filterable: true,
                    facetable: true,
                    ..IndexField::text("source")
                },
                IndexField {
                    searchable: true,
                    filterable: true,
                    facetable: true,
                    ..IndexField::text("doc_type")
                },
                IndexField::text("metadata"),
                IndexField::vector(VECTOR_FIELD, dimensions, VECTOR_PROFILE),
            ],
            vector_search: VectorSearchConfig {
                algorithms: vec![
                    VectorAlgorithm {
                        name: HNSW_ALGORITHM.to_string(),
                        kind: "hnsw".to_string(),
                        hnsw_parameters: Some(HnswParameters {
                            metric: "cosine".to_string(),
                            m: 4,
                            ef_construction: 400,
                            ef_search: 500,
                        }),
                        exhaustive_knn_parameters: None,
                    },
                    VectorAlgorithm {
                        name: EXHAUSTIVE_ALGORITHM.to_string(),
                        kind: "exhaustiveKnn".to_string(),
                        hnsw_parameters: None,
                        exhaustive_knn_parameters: Some(ExhaustiveKnnParameters {
                            metric: "cosine".to_string(),
                        }),
                    },
                ],
                profiles: vec![VectorProfile {
                    name: VECTOR_PROFILE.to_string(),
                    algorithm: profile_algorithm.to_string(),
                }],
            },
            semantic: Some(SemanticSearch::over_content()),
        }
    }

    pub fn without_semantic(mut self) -> Self {
        self.semantic = None;
        self
    }

    pub fn vector_dimensions(&self) -> Option<usize> {
        self.fields
            .iter()
            .find(|field| field.vector_search_profile.is_some())
            .and_then(|field| field.dimensions)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.name.trim().is_empty() {
            return Err(IngestError::Schema("index name is empty".to_string()));
        }

        let keys = self.fields.iter().filter(|field| field.key).count();
        if keys != 1 {
            return Err(IngestError::Schema(format!(
                "index needs exactly one key field, found {keys}"
            )));
        }

        for profile in &self.vector_search.profiles {
            let known = self
                .vector_search
                .algorithms
                .iter()
                .any(|algorithm| algorithm.name == profile.algorithm);
            if !known {
                return Err(IngestError::Schema(format!(
                    "profile {} references unknown algorithm {}",
                    profile.name, profile.algorithm
                )));
            }
        }

        for field in &self.fields {
            let Some(profile) = &field.vector_search_profile else {
                continue;
            };
            if field.dimensions.unwrap_or(0) == 0 {
                return Err(IngestError::InvalidConfiguration(format!(
                    "vector field {} needs a positive dimension",
                    field.name
                )));
            }
            if !self.vector_search.profiles.iter().any(|known| &known.name == profile) {
                return Err(IngestError::Schema(format!(
                    "field {} references unknown profile {profile}",
                    field.name
                )));
            }
        }

        let configurations = self.semantic.iter().flat_map(|semantic| &semantic.configurations);
        for configuration in configurations {
            let prioritized = &configuration.prioritized_fields;
            let referenced = prioritized
                .title_field
                .iter()
                .chain(&prioritized.prioritized_content_fields)
                .chain(&prioritized.prioritized_keywords_fields);
            for semantic_field in referenced {
                let searchable = self
                    .fields
                    .iter()
                    .any(|field| field.name == semantic_field.field_name && field.searchable);
                if !searchable {
                    return Err(IngestError::Schema(format!(
                        "semantic configuration {} references non-searchable field {}",
                        configuration.name, semantic_field.field_name
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Absent,
    Present,
}

// Full-replace lifecycle of the search index. `recreate` must complete before any
// ingestion writes start; it is not safe to overlap with uploads.
pub struct IndexManager<A>
where
    A: IndexAdmin,
{
    admin: A,
    retry: RetryPolicy,
}

impl<A> IndexManager<A>
where
    A: IndexAdmin,
{
    pub fn new(admin: A, retry: RetryPolicy) -> Self {
        Self { admin, retry }
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    pub async fn recreate(&self, schema: &IndexSchema) -> Result<IndexState, IngestError> {
        schema.validate()?;

        info!(index = %schema.name, "deleting index");
        let outcome = with_retry("delete_index", &self.retry, || {
            self.admin.delete_index(&schema.name)
        })
        .await?;
        if outcome == DeleteOutcome::NotFound {
            info!(index = %schema.name, "index did not exist, continuing");
        }

        info!(
            index = %schema.name,
            dimensions = schema.vector_dimensions().unwrap_or(0),
            "creating index"
        );
        with_retry("create_index", &self.retry, || self.admin.create_index(schema)).await?;
        info!(index = %schema.name, "index created");

        Ok(IndexState::Present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SearchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeAdmin {
        indexes: Mutex<HashMap<String, IndexSchema>>,
        fail_delete_with: Option<u16>,
    }

    #[async_trait]
    impl IndexAdmin for FakeAdmin {
        async fn delete_index(&self, name: &str) -> Result<DeleteOutcome, SearchError> {
            if let Some(status) = self.fail_delete_with {
                return Err(SearchError::IndexSetup {
                    status,
                    message: "denied".to_string(),
                });
            }
            let removed = self.indexes.lock().unwrap().remove(name);
            Ok(if removed.is_some() {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::NotFound
            })
        }

        async fn create_index(&self, schema: &IndexSchema) -> Result<(), SearchError> {
            let mut indexes = self.indexes.lock().unwrap();
            if indexes.contains_key(&schema.name) {
                return Err(SearchError::IndexSetup {
                    status: 409,
                    message: "exists".to_string(),
                });
            }
            indexes.insert(schema.name.clone(), schema.clone());
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn recreate_twice_converges_on_one_index() {
        let manager = IndexManager::new(FakeAdmin::default(), policy());
        let schema = IndexSchema::standard("docs", 1536, SimilarityAlgorithm::Hnsw);

        assert_eq!(manager.recreate(&schema).await.unwrap(), IndexState::Present);
        assert_eq!(manager.recreate(&schema).await.unwrap(), IndexState::Present);

        let indexes = manager.admin().indexes.lock().unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes["docs"], schema);
    }

    #[tokio::test]
    async fn delete_failures_other_than_missing_are_fatal() {
        let admin = FakeAdmin {
            fail_delete_with: Some(403),
            ..FakeAdmin::default()
        };
        let manager = IndexManager::new(admin, policy());
        let schema = IndexSchema::standard("docs", 8, SimilarityAlgorithm::Hnsw);

        let result = manager.recreate(&schema).await;
        assert!(matches!(result, Err(IngestError::Search(SearchError::IndexSetup { status: 403, .. }))));
        assert!(manager.admin().indexes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_dimension_schema_never_touches_the_service() {
        let manager = IndexManager::new(FakeAdmin::default(), policy());
        let schema = IndexSchema::standard("docs", 0, SimilarityAlgorithm::Hnsw);
        let result = manager.recreate(&schema).await;
        assert!(matches!(result, Err(IngestError::InvalidConfiguration(_))));
    }

    #[test]
    fn schema_serializes_to_service_definition() {
        let schema = IndexSchema::standard("docs", 1536, SimilarityAlgorithm::ExhaustiveKnn);
        let value = serde_json::to_value(&schema).unwrap();

        assert_eq!(value["fields"][0]["name"], "id");
        assert_eq!(value["fields"][0]["key"], true);
        assert_eq!(value["fields"][5]["name"], "contentVector");
        assert_eq!(value["fields"][5]["dimensions"], 1536);
        assert_eq!(value["fields"][5]["vectorSearchProfile"], VECTOR_PROFILE);
        assert_eq!(value["vectorSearch"]["profiles"][0]["algorithm"], EXHAUSTIVE_ALGORITHM);
        assert_eq!(
            value["vectorSearch"]["algorithms"][0]["hnswParameters"]["efConstruction"],
            400
        );
        assert_eq!(schema.vector_dimensions(), Some(1536));

        let semantic = &value["semantic"]["configurations"][0];
        assert_eq!(semantic["name"], SEMANTIC_CONFIGURATION);
        assert_eq!(
            semantic["prioritizedFields"]["prioritizedContentFields"][0]["fieldName"],
            "content"
        );
    }

    #[test]
    fn semantic_section_can_be_left_out() {
        let schema =
            IndexSchema::standard("docs", 8, SimilarityAlgorithm::Hnsw).without_semantic();
        let value = serde_json::to_value(&schema).unwrap();
        assert!(value.get("semantic").is_none());
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn semantic_field_must_be_searchable() {
        let mut schema = IndexSchema::standard("docs", 8, SimilarityAlgorithm::Hnsw);
        if let Some(semantic) = schema.semantic.as_mut() {
            semantic.configurations[0].prioritized_fields.prioritized_content_fields[0].field_name =
                "metadata".to_string();
        }
        assert!(matches!(schema.validate(), Err(IngestError::Schema(_))));
    }

    #[test]
    fn profile_with_unknown_algorithm_is_rejected() {
        let mut schema = IndexSchema::standard("docs", 8, SimilarityAlgorithm::Hnsw);
        schema.vector_search.profiles[0].algorithm = "missing".to_string();
        assert!(matches!(schema.validate(), Err(IngestError::Schema(_))));
    }
}
