//! Interface to the remote GraphQL service.
//!
//! The cache core only depends on [`GraphqlTransport`]; [`crate::HttpTransport`]
//! is the network implementation and tests plug in in-memory fakes.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::TaskSyncError;
use crate::operations::Operation;

/// A GraphQL error entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: None,
        }
    }
}

impl std::fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            return f.write_str(&self.message);
        }
        let path = self
            .path
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{} (at {})", self.message, path)
    }
}

/// A `{ data, errors? }` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

/// Read an absent or `null` list as empty.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl GraphqlResponse {
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<GraphqlError>) -> Self {
        Self { data: None, errors }
    }

    /// The value under `data.<field>`, if present and not null.
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|d| d.get(field))
            .filter(|v| !v.is_null())
    }

    /// Take `data.<field>` or fail.
    ///
    /// Errors alongside a present field are left for the caller; with no
    /// field, reported errors win over a generic missing-field error.
    pub fn require(&self, field: &'static str) -> Result<&Value, TaskSyncError> {
        match self.field(field) {
            Some(v) => Ok(v),
            None if !self.errors.is_empty() => Err(TaskSyncError::Graphql(self.errors.clone())),
            None => Err(TaskSyncError::MissingField(field)),
        }
    }
}

/// Client for the remote service: query, mutate, subscribe.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    /// Run a query. Partial results come back as `Ok` with `errors` set.
    async fn query(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<GraphqlResponse, TaskSyncError>;

    /// Run a mutation.
    async fn mutate(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<GraphqlResponse, TaskSyncError>;

    /// Start a subscription. The stream ends when the server completes it.
    async fn subscribe(
        &self,
        op: &Operation,
        variables: Value,
    ) -> Result<BoxStream<'static, Result<GraphqlResponse, TaskSyncError>>, TaskSyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_partial_response() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "data": {"allTasks": [{"id": "1", "title": "a", "description": ""}, null]},
            "errors": [{"message": "boom", "path": ["allTasks", 1]}]
        }))
        .unwrap();
        assert!(resp.field("allTasks").is_some());
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].to_string(), "boom (at allTasks.1)");
    }

    #[test]
    fn test_null_error_lists_read_as_empty() {
        let resp: GraphqlResponse = serde_json::from_value(json!({
            "data": {"deleteTask": "3"},
            "errors": null
        }))
        .unwrap();
        assert!(resp.errors.is_empty());
        assert_eq!(resp.require("deleteTask").unwrap(), &json!("3"));

        let error: GraphqlError =
            serde_json::from_value(json!({"message": "boom", "path": null})).unwrap();
        assert_eq!(error, GraphqlError::new("boom"));
    }

    #[test]
    fn test_require_prefers_reported_errors() {
        let resp = GraphqlResponse {
            data: Some(json!({"createTask": null})),
            errors: vec![GraphqlError::new("denied")],
        };
        assert!(matches!(
            resp.require("createTask"),
            Err(TaskSyncError::Graphql(errors)) if errors[0].message == "denied"
        ));

        let empty = GraphqlResponse::default();
        assert!(matches!(
            empty.require("createTask"),
            Err(TaskSyncError::MissingField("createTask"))
        ));
    }
}
