//! Provisional mutation results applied before the server answers.

use serde_json::{Map, Value, json};

use crate::types::{NewTask, Task, TaskId, TaskPatch};

/// What a mutation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationIntent {
    Create(NewTask),
    Update(TaskPatch),
    Delete(TaskId),
}

impl MutationIntent {
    /// Root field of the matching mutation response.
    pub fn operation(&self) -> &'static str {
        match self {
            MutationIntent::Create(_) => crate::operations::ADD_TASK.root_field,
            MutationIntent::Update(_) => crate::operations::UPDATE_TASK.root_field,
            MutationIntent::Delete(_) => crate::operations::DELETE_TASK.root_field,
        }
    }
}

/// The record a provisional result carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    Created(Task),
    Updated(TaskPatch),
    Deleted(TaskId),
}

/// A locally built stand-in for a mutation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalResult {
    /// Response root field (`createTask`, `updateTask`, `deleteTask`).
    pub operation: &'static str,
    /// GraphQL type name of the record.
    pub type_name: String,
    pub record: MutationRecord,
    /// Placeholder id for creates; passed along with the confirmed result
    /// so the optimistic entry is superseded rather than duplicated.
    pub placeholder: Option<TaskId>,
}

impl ProvisionalResult {
    /// Render as a mutation response body.
    ///
    /// Same shape as the server's answer, plus `optimisticResponse: true`.
    pub fn to_response(&self) -> Value {
        let body = match &self.record {
            MutationRecord::Deleted(id) => Value::String(id.0.clone()),
            MutationRecord::Created(task) => self.tagged(serde_json::to_value(task)),
            MutationRecord::Updated(patch) => self.tagged(serde_json::to_value(patch)),
        };
        let mut root = Map::new();
        root.insert(self.operation.to_string(), body);
        Value::Object(root)
    }

    fn tagged(&self, fields: Result<Value, serde_json::Error>) -> Value {
        let mut out = Map::new();
        out.insert("__typename".to_string(), json!(self.type_name));
        out.insert("optimisticResponse".to_string(), Value::Bool(true));
        // Plain structs of strings always serialize to objects.
        if let Ok(Value::Object(fields)) = fields {
            out.extend(fields);
        }
        Value::Object(out)
    }
}

/// Builds provisional results. Pure apart from placeholder allocation.
#[derive(Debug, Clone, Default)]
pub struct OptimisticSynthesizer;

impl OptimisticSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Build the provisional result for a mutation.
    ///
    /// Creates get a fresh placeholder id; updates echo the supplied fields
    /// under the known id; deletes carry only the id.
    pub fn synthesize(&self, intent: &MutationIntent, type_name: &str) -> ProvisionalResult {
        let (record, placeholder) = match intent {
            MutationIntent::Create(new_task) => {
                let id = TaskId::placeholder();
                let task = Task {
                    id: id.clone(),
                    title: new_task.title.clone(),
                    description: new_task.description.clone(),
                };
                (MutationRecord::Created(task), Some(id))
            }
            MutationIntent::Update(patch) => (MutationRecord::Updated(patch.clone()), None),
            MutationIntent::Delete(id) => (MutationRecord::Deleted(id.clone()), None),
        };

        ProvisionalResult {
            operation: intent.operation(),
            type_name: type_name.to_string(),
            record,
            placeholder,
        }
    }
}
