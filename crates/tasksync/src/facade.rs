//! Public surface over the task collection.
//!
//! [`TaskCollection`] fetches the list, runs mutations optimistically and
//! exposes observer registration. Every cache write goes through the
//! [`Reconciler`].

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::TaskSyncError;
use crate::operations::{ADD_TASK, DELETE_TASK, GET_TASKS, Operation, UPDATE_TASK};
use crate::optimistic::{MutationIntent, MutationRecord, OptimisticSynthesizer, ProvisionalResult};
use crate::push::PushListener;
use crate::reconciler::{Reconciler, Reversal};
use crate::router::{ObserverId, SubscriptionRouter};
use crate::store::QueryCacheStore;
use crate::transport::{GraphqlError, GraphqlResponse, GraphqlTransport};
use crate::types::{Channel, Collection, NewTask, Task, TaskId, TaskPatch};

/// GraphQL type name of task records.
pub const TASK_TYPENAME: &str = "Task";

/// Result of [`TaskCollection::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// The installed snapshot, or `None` when the service sent no list.
    pub tasks: Option<Arc<Collection>>,
    /// Every error the service reported.
    pub errors: Vec<GraphqlError>,
}

impl FetchOutcome {
    /// Data came back but some of it failed.
    pub fn is_partial(&self) -> bool {
        self.tasks.is_some() && !self.errors.is_empty()
    }
}

/// A mutation between its optimistic write and its confirmation.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub intent: MutationIntent,
    pub provisional: ProvisionalResult,
    /// Undoes the optimistic write if the mutation fails.
    pub reversal: Reversal,
    /// Filled in once the server answered.
    pub confirmed: Option<MutationRecord>,
}

/// Fetch, mutate and observe the shared task list.
pub struct TaskCollection<T> {
    transport: Arc<T>,
    store: Arc<QueryCacheStore>,
    reconciler: Reconciler,
    synthesizer: OptimisticSynthesizer,
    router: Arc<SubscriptionRouter>,
}

impl<T: GraphqlTransport + 'static> TaskCollection<T> {
    pub fn new(transport: Arc<T>, store: Arc<QueryCacheStore>) -> Self {
        Self {
            transport,
            reconciler: Reconciler::new(Arc::clone(&store)),
            store,
            synthesizer: OptimisticSynthesizer::new(),
            router: SubscriptionRouter::new(),
        }
    }

    /// Use a router shared with other components.
    pub fn with_router(mut self, router: Arc<SubscriptionRouter>) -> Self {
        self.router = router;
        self
    }

    pub fn store(&self) -> &Arc<QueryCacheStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<SubscriptionRouter> {
        &self.router
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current cached list, if fetched.
    pub fn snapshot(&self) -> Option<Arc<Collection>> {
        self.reconciler.snapshot()
    }

    /// Fetch the list from the service and install it.
    ///
    /// Always goes to the network. Items that came back null or malformed
    /// are dropped; the rest is installed and all errors are returned.
    pub async fn fetch(&self) -> Result<FetchOutcome, TaskSyncError> {
        let root = GET_TASKS.root_field;
        let response = self.transport.query(&GET_TASKS, json!({})).await?;

        let Some(list) = response.field(root) else {
            if response.errors.is_empty() {
                return Err(TaskSyncError::MissingField(root));
            }
            warn!(errors = response.errors.len(), "fetch returned errors and no task list");
            return Ok(FetchOutcome {
                tasks: None,
                errors: response.errors,
            });
        };
        let Some(items) = list.as_array() else {
            return Err(TaskSyncError::MissingField(root));
        };

        let tasks = items.iter().enumerate().filter_map(|(index, item)| {
            if item.is_null() {
                debug!(index, "skipping null task in fetch result");
                return None;
            }
            match serde_json::from_value::<Task>(item.clone()) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(index, error = %e, "skipping malformed task in fetch result");
                    None
                }
            }
        });
        let installed = self.reconciler.install(Collection::from_tasks(tasks));

        if response.errors.is_empty() {
            info!(tasks = installed.len(), "fetched tasks");
        } else {
            warn!(
                tasks = installed.len(),
                errors = response.errors.len(),
                "fetched partial task list"
            );
        }

        Ok(FetchOutcome {
            tasks: Some(installed),
            errors: response.errors,
        })
    }

    /// Create a task. Shows up in the cache under a placeholder id at once
    /// and under its real id once the service confirms.
    pub async fn create(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Task, TaskSyncError> {
        let new_task = NewTask {
            title: title.into(),
            description: description.into(),
        };
        let variables = serde_json::to_value(&new_task)?;
        match self.execute(MutationIntent::Create(new_task), &ADD_TASK, variables).await? {
            MutationRecord::Created(task) => Ok(task),
            _ => Err(TaskSyncError::MissingField(ADD_TASK.root_field)),
        }
    }

    /// Change the fields set on `patch`.
    pub async fn update(&self, patch: TaskPatch) -> Result<Task, TaskSyncError> {
        let variables = serde_json::to_value(&patch)?;
        let id = patch.id.clone();
        match self.execute(MutationIntent::Update(patch), &UPDATE_TASK, variables).await? {
            MutationRecord::Updated(confirmed) => Ok(Task {
                id,
                title: confirmed.title.unwrap_or_default(),
                description: confirmed.description.unwrap_or_default(),
            }),
            _ => Err(TaskSyncError::MissingField(UPDATE_TASK.root_field)),
        }
    }

    /// Delete `task`. Only that task's id is ever removed.
    pub async fn delete(&self, task: &Task) -> Result<TaskId, TaskSyncError> {
        let variables = json!({ "id": task.id });
        match self
            .execute(MutationIntent::Delete(task.id.clone()), &DELETE_TASK, variables)
            .await?
        {
            MutationRecord::Deleted(id) => Ok(id),
            _ => Err(TaskSyncError::MissingField(DELETE_TASK.root_field)),
        }
    }

    /// Reconcile every push event into the cache.
    ///
    /// Registers the reconciler on all three channels; observers added
    /// later run after it.
    pub fn reconcile_push_events(&self) -> Vec<ObserverId> {
        Channel::ALL
            .into_iter()
            .map(|channel| {
                let reconciler = self.reconciler.clone();
                self.router.register(
                    channel,
                    Arc::new(move |event| {
                        reconciler.apply(event);
                    }),
                )
            })
            .collect()
    }

    pub fn on_created<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.router.on_created(f)
    }

    pub fn on_modified<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.router.on_modified(f)
    }

    pub fn on_deleted<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&TaskId) + Send + Sync + 'static,
    {
        self.router.on_deleted(f)
    }

    /// Listener feeding this collection's router from the service's
    /// subscriptions.
    pub fn push_listener(&self) -> PushListener<T> {
        PushListener::new(Arc::clone(&self.transport), Arc::clone(&self.router))
    }

    /// Optimistic write, round trip, then confirmation or revert.
    async fn execute(
        &self,
        intent: MutationIntent,
        op: &Operation,
        variables: Value,
    ) -> Result<MutationRecord, TaskSyncError> {
        let provisional = self.synthesizer.synthesize(&intent, TASK_TYPENAME);
        let reversal = self.reconcile(&provisional.record, None);
        let mut pending = PendingMutation {
            intent,
            provisional,
            reversal,
            confirmed: None,
        };
        trace!(operation = op.name, reversal = ?pending.reversal, "optimistic write applied");

        let confirmed = match self.transport.mutate(op, variables).await {
            Ok(response) => confirmed_record(&pending.intent, op, &response),
            Err(e) => Err(e),
        };

        match confirmed {
            Ok(record) => {
                self.reconcile(&record, pending.provisional.placeholder.as_ref());
                pending.confirmed = Some(record.clone());
                debug!(operation = op.name, pending = ?pending, "mutation confirmed");
                Ok(record)
            }
            Err(e) => {
                warn!(
                    operation = op.name,
                    error = %e,
                    "mutation failed, reverting optimistic write"
                );
                self.reconciler.revert(&pending.reversal);
                Err(e)
            }
        }
    }

    fn reconcile(&self, record: &MutationRecord, supersedes: Option<&TaskId>) -> Reversal {
        match record {
            MutationRecord::Created(task) => self.reconciler.on_create(task, supersedes),
            MutationRecord::Updated(patch) => self.reconciler.on_update(patch),
            MutationRecord::Deleted(id) => self.reconciler.on_delete(id),
        }
    }
}

/// Read the server's answer to a mutation.
///
/// Errors next to usable data are logged and the data is kept.
fn confirmed_record(
    intent: &MutationIntent,
    op: &Operation,
    response: &GraphqlResponse,
) -> Result<MutationRecord, TaskSyncError> {
    let value = response.require(op.root_field)?;
    if !response.errors.is_empty() {
        warn!(
            operation = op.name,
            errors = response.errors.len(),
            "mutation returned errors alongside data"
        );
    }

    match intent {
        MutationIntent::Create(_) => {
            let task: Task = serde_json::from_value(value.clone())?;
            Ok(MutationRecord::Created(task))
        }
        MutationIntent::Update(_) => {
            let task: Task = serde_json::from_value(value.clone())?;
            Ok(MutationRecord::Updated(TaskPatch::from(task)))
        }
        MutationIntent::Delete(target) => {
            let id = TaskId::from_value(value).ok_or(TaskSyncError::MissingField(op.root_field))?;
            if &id != target {
                warn!(
                    requested = %target,
                    confirmed = %id,
                    "delete confirmed a different id, removing the requested one"
                );
            }
            Ok(MutationRecord::Deleted(target.clone()))
        }
    }
}
