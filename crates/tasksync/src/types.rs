//! Core types for the task collection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counter for placeholder ids, so two synthesizers never
/// hand out the same placeholder.
static PLACEHOLDER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Prefix carried by every locally generated placeholder id.
const PLACEHOLDER_PREFIX: &str = "tmp-";

/// Identity of a task.
///
/// Server-assigned for confirmed tasks. Optimistic creates carry a
/// placeholder (`tmp-<n>`) until the confirmed id replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Allocate a fresh placeholder id.
    pub fn placeholder() -> Self {
        let n = PLACEHOLDER_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self(format!("{}{}", PLACEHOLDER_PREFIX, n))
    }

    /// Whether this id was generated locally for an optimistic create.
    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(PLACEHOLDER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a response value.
    ///
    /// Accepts a string, a number, or an object with an `id` field, since
    /// services differ in what a delete returns.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            serde_json::Value::Object(map) => map.get("id").and_then(Self::from_value),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A task in the shared list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Input for `AddTask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
}

/// Input for `UpdateTask`.
///
/// Only the fields that are `Some` are written; the rest keep their
/// current value (last writer wins per field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TaskPatch {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Apply the patch to a task with the same id.
    pub fn apply_to(&self, task: &Task) -> Task {
        Task {
            id: task.id.clone(),
            title: self.title.clone().unwrap_or_else(|| task.title.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| task.description.clone()),
        }
    }
}

impl From<Task> for TaskPatch {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: Some(task.title),
            description: Some(task.description),
        }
    }
}

/// Immutable snapshot of the task list for one query.
///
/// Ids are unique within a snapshot. Reconciliation never edits a
/// snapshot; it builds a new one and installs it whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    tasks: Vec<Task>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot, collapsing repeated ids.
    ///
    /// A repeated id keeps the slot of its first occurrence and the fields
    /// of its last.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut out: Vec<Task> = Vec::new();
        let mut slots: HashMap<TaskId, usize> = HashMap::new();
        for task in tasks {
            match slots.get(&task.id) {
                Some(&i) => out[i] = task,
                None => {
                    slots.insert(task.id.clone(), out.len());
                    out.push(task);
                }
            }
        }
        Self { tasks: out }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.position(id).is_some()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Task> {
        self.tasks.clone()
    }

    /// Wrap an already-deduplicated list. Callers inside the crate
    /// maintain the unique-id invariant themselves.
    pub(crate) fn from_unique(tasks: Vec<Task>) -> Self {
        debug_assert!(
            {
                let mut seen = std::collections::HashSet::new();
                tasks.iter().all(|t| seen.insert(&t.id))
            },
            "collection ids must be unique"
        );
        Self { tasks }
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

/// Identity of a cached query: operation name plus its bound variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    operation: String,
    /// Canonical JSON text of the variables (object keys sorted).
    variables: String,
}

impl QueryKey {
    pub fn new(operation: impl Into<String>, variables: &serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            // serde_json's default Map is a BTreeMap, so this is key-ordered.
            variables: variables.to_string(),
        }
    }

    /// Key for the `GetTasks` query.
    pub fn all_tasks() -> Self {
        Self::new(
            crate::operations::GET_TASKS.name,
            &serde_json::Value::Object(serde_json::Map::new()),
        )
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn variables(&self) -> &str {
        &self.variables
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.operation, self.variables)
    }
}

/// Push notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Created,
    Modified,
    Deleted,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Created, Channel::Modified, Channel::Deleted];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Created => "created",
            Channel::Modified => "modified",
            Channel::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A change to the collection announced by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Created(Task),
    Modified(Task),
    Deleted(TaskId),
}

impl TaskEvent {
    pub fn channel(&self) -> Channel {
        match self {
            TaskEvent::Created(_) => Channel::Created,
            TaskEvent::Modified(_) => Channel::Modified,
            TaskEvent::Deleted(_) => Channel::Deleted,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::Created(task) | TaskEvent::Modified(task) => &task.id,
            TaskEvent::Deleted(id) => id,
        }
    }
}
