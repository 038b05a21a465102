//! GraphQL operations consumed by the task cache.

/// What kind of GraphQL operation a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// A named GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// Operation name (sent as `operationName`).
    pub name: &'static str,
    pub kind: OperationKind,
    /// GraphQL document text.
    pub document: &'static str,
    /// Field under `data` holding the result.
    pub root_field: &'static str,
}

pub const GET_TASKS: Operation = Operation {
    name: "GetTasks",
    kind: OperationKind::Query,
    document: "query GetTasks { allTasks { id title description } }",
    root_field: "allTasks",
};

pub const ADD_TASK: Operation = Operation {
    name: "AddTask",
    kind: OperationKind::Mutation,
    document: "mutation AddTask($title: String!, $description: String!) { \
               createTask(title: $title, description: $description) { id title description } }",
    root_field: "createTask",
};

pub const UPDATE_TASK: Operation = Operation {
    name: "UpdateTask",
    kind: OperationKind::Mutation,
    document: "mutation UpdateTask($id: ID!, $title: String, $description: String) { \
               updateTask(id: $id, title: $title, description: $description) { \
               id title description } }",
    root_field: "updateTask",
};

pub const DELETE_TASK: Operation = Operation {
    name: "DeleteTask",
    kind: OperationKind::Mutation,
    document: "mutation DeleteTask($id: ID!) { deleteTask(id: $id) }",
    root_field: "deleteTask",
};

pub const TASK_CREATED: Operation = Operation {
    name: "TaskCreated",
    kind: OperationKind::Subscription,
    document: "subscription TaskCreated { taskCreated { id title description } }",
    root_field: "taskCreated",
};

pub const TASK_MODIFIED: Operation = Operation {
    name: "TaskModified",
    kind: OperationKind::Subscription,
    document: "subscription TaskModified { taskModified { id title description } }",
    root_field: "taskModified",
};

pub const TASK_DELETED: Operation = Operation {
    name: "TaskDeleted",
    kind: OperationKind::Subscription,
    document: "subscription TaskDeleted { taskDeleted }",
    root_field: "taskDeleted",
};

/// Subscription operation feeding a push channel.
pub fn subscription_for(channel: crate::Channel) -> &'static Operation {
    match channel {
        crate::Channel::Created => &TASK_CREATED,
        crate::Channel::Modified => &TASK_MODIFIED,
        crate::Channel::Deleted => &TASK_DELETED,
    }
}
