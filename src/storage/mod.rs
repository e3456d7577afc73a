//! Storage gateway: the narrow interface the services consume.
//!
//! The gateway speaks in raw semi-structured records (`serde_json::Value`
//! objects) and knows nothing about relations or traversal; it offers CRUD by
//! id plus filtered queries with optional projections. [`MemoryGateway`] is the
//! bundled document-store backend; alternative backends implement
//! [`StorageGateway`].

pub mod memory;

pub use memory::MemoryGateway;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Collection, DocumentId, Lookup};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record for {collection} is not a JSON object")]
    NotAnObject { collection: Collection },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Single equality-style predicate on a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value; on an array field, the array contains it.
    Eq(Value),
    /// Field value is one of the listed values.
    In(Vec<Value>),
}

impl Predicate {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(target) => match value {
                Value::Array(items) => items.iter().any(|item| item == target),
                other => other == target,
            },
            Predicate::In(candidates) => match value {
                Value::Array(items) => items.iter().any(|item| candidates.contains(item)),
                other => candidates.contains(other),
            },
        }
    }
}

/// Conjunction of field predicates.
///
/// Field paths use dotted notation. A path component that lands on an array of
/// objects matches if any element satisfies the remainder of the path, which is
/// how queries reach into embedded collections (`activity_executions.id`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    clauses: Vec<(String, Predicate)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Predicate::Eq(value.into())));
        self
    }

    /// "id is one of" predicate fragment.
    pub fn id_in(ids: &[DocumentId]) -> Self {
        let candidates = ids
            .iter()
            .map(|id| Value::String(id.0.clone()))
            .collect::<Vec<_>>();
        Filter {
            clauses: vec![("id".to_string(), Predicate::In(candidates))],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Rewrites every clause under a field prefix, used to turn a filter on
    /// embedded records into a filter on their owning documents.
    pub fn prefixed(&self, prefix: &str) -> Filter {
        Filter {
            clauses: self
                .clauses
                .iter()
                .map(|(field, predicate)| (format!("{prefix}.{field}"), predicate.clone()))
                .collect(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.clauses.iter().all(|(field, predicate)| {
            let path = field.split('.').collect::<Vec<_>>();
            path_matches(record, &path, predicate)
        })
    }
}

fn path_matches(value: &Value, path: &[&str], predicate: &Predicate) -> bool {
    match path.split_first() {
        None => predicate.matches(value),
        Some((head, rest)) => match value {
            Value::Object(map) => map
                .get(*head)
                .is_some_and(|inner| path_matches(inner, rest, predicate)),
            Value::Array(items) => items.iter().any(|item| path_matches(item, path, predicate)),
            _ => false,
        },
    }
}

/// Field projection with optional embedded-array narrowing.
///
/// `id` is always carried through. When `elem_match` is set, the named array
/// field is reduced to the elements matching the filter; an array field listed
/// in `include` is carried whole.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    include: Vec<String>,
    elem_match: Option<(String, Filter)>,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection {
            include: fields.into_iter().map(Into::into).collect(),
            elem_match: None,
        }
    }

    pub fn with_elem_match(mut self, field: impl Into<String>, filter: Filter) -> Self {
        self.elem_match = Some((field.into(), filter));
        self
    }

    pub fn apply(&self, record: &Value) -> Value {
        let Some(source) = record.as_object() else {
            return record.clone();
        };
        let mut projected = serde_json::Map::new();
        if let Some(id) = source.get("id") {
            projected.insert("id".to_string(), id.clone());
        }
        for field in &self.include {
            if let Some(value) = source.get(field) {
                projected.insert(field.clone(), value.clone());
            }
        }
        if let Some((field, filter)) = &self.elem_match {
            if let Some(Value::Array(items)) = source.get(field) {
                let kept = items
                    .iter()
                    .filter(|item| filter.matches(item))
                    .cloned()
                    .collect::<Vec<_>>();
                projected.insert(field.clone(), Value::Array(kept));
            }
        }
        Value::Object(projected)
    }
}

/// Create/read/update/delete plus filtered query against one dataset
/// namespace. All operations are scoped to exactly one dataset.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Persists a new document and returns the storage-assigned id.
    async fn create_document(
        &self,
        collection: Collection,
        dataset: &str,
        record: Value,
    ) -> Result<DocumentId, StorageError>;

    async fn get_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
        projection: Option<&Projection>,
    ) -> Result<Lookup<Value>, StorageError>;

    async fn get_documents(
        &self,
        collection: Collection,
        dataset: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Vec<Value>, StorageError>;

    /// Full replace of a document from its typed-model serialization.
    async fn update_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
        record: Value,
    ) -> Result<(), StorageError>;

    /// Full replace with fields whose shape differs from the typed model
    /// (e.g. the scenario's raw id-list form).
    async fn update_document_raw(
        &self,
        collection: Collection,
        id: &DocumentId,
        fields: Value,
        dataset: &str,
    ) -> Result<(), StorageError>;

    async fn delete_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
    ) -> Result<(), StorageError>;

    /// Removes a whole dataset namespace and everything in it.
    async fn drop_dataset(&self, dataset: &str) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_plain_and_embedded_fields() {
        let record = json!({
            "id": "a1",
            "activity": "group",
            "activity_executions": [
                {"id": "e1", "arrangement_id": "r1"},
                {"id": "e2", "arrangement_id": null},
            ],
        });

        assert!(Filter::new().eq("activity", "group").matches(&record));
        assert!(Filter::new().eq("activity_executions.id", "e2").matches(&record));
        assert!(!Filter::new().eq("activity_executions.id", "e3").matches(&record));
    }

    #[test]
    fn filter_eq_on_scalar_array_means_contains() {
        let scenario = json!({"id": "s1", "activity_executions": ["e1", "e2"]});
        assert!(Filter::new().eq("activity_executions", "e2").matches(&scenario));
        assert!(!Filter::new().eq("activity_executions", "e9").matches(&scenario));
    }

    #[test]
    fn id_in_fragment() {
        let ids = vec![DocumentId::from("a"), DocumentId::from("b")];
        let filter = Filter::id_in(&ids);
        assert!(filter.matches(&json!({"id": "b"})));
        assert!(!filter.matches(&json!({"id": "c"})));
    }

    #[test]
    fn prefixed_filter_rewrites_paths() {
        let filter = Filter::new().eq("arrangement_id", "r1");
        let rewritten = filter.prefixed("activity_executions");
        let activity = json!({
            "activity_executions": [{"id": "e1", "arrangement_id": "r1"}],
        });
        assert!(rewritten.matches(&activity));
    }

    #[test]
    fn projection_narrows_embedded_array_and_keeps_id() {
        let activity = json!({
            "id": "a1",
            "activity": "individual",
            "additional_properties": [],
            "activity_executions": [{"id": "e1"}, {"id": "e2"}],
        });
        let projection = Projection::include(["additional_properties"])
            .with_elem_match("activity_executions", Filter::new().eq("id", "e2"));
        let projected = projection.apply(&activity);

        assert_eq!(projected["id"], "a1");
        assert_eq!(projected["activity_executions"], json!([{"id": "e2"}]));
        assert!(projected.get("activity").is_none());
    }
}
