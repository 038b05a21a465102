//! Merges optimistic, confirmed and pushed results into the cached task list.
//!
//! All three sources go through the same procedures. Creates dedup by id
//! and deletes filter by id, so applying the same result twice, or results
//! for different tasks in either order, ends in the same collection.
//!
//! Every procedure returns a [`Reversal`] describing how to undo what it
//! did to that one task. The facade keeps it while a mutation is in flight
//! and hands it to [`Reconciler::revert`] if the mutation fails.
//!
//! Deleted ids are remembered as tombstones until the next
//! [`Reconciler::install`]. A create for a tombstoned id is not installed,
//! and a failed delete is only undone while its own tombstone is the
//! latest one for that id.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::store::QueryCacheStore;
use crate::types::{Collection, QueryKey, Task, TaskEvent, TaskId, TaskPatch};

/// How to undo one reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reversal {
    /// Nothing was changed.
    Nothing,
    /// Undo a create: drop the task again.
    RemoveTask(TaskId),
    /// Undo a delete: put the task back near where it was.
    RestoreTask {
        task: Task,
        index: usize,
        tombstone: u64,
    },
    /// Undo a delete that found nothing to remove.
    ClearTombstone { id: TaskId, tombstone: u64 },
    /// Undo an update.
    ///
    /// `previous` holds the values the update replaced and `applied` the
    /// values it wrote. A field is only put back while it still holds the
    /// applied value.
    RestoreFields {
        previous: TaskPatch,
        applied: TaskPatch,
    },
}

/// Applies create/update/delete results to the task query's cache entry.
///
/// Clones share the same tombstones.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<QueryCacheStore>,
    key: QueryKey,
    tombstones: Arc<DashMap<TaskId, u64>>,
    next_tombstone: Arc<AtomicU64>,
}

impl Reconciler {
    /// Reconciler for the `GetTasks` query.
    pub fn new(store: Arc<QueryCacheStore>) -> Self {
        Self::for_query(store, QueryKey::all_tasks())
    }

    /// Reconciler for a specific query entry.
    pub fn for_query(store: Arc<QueryCacheStore>, key: QueryKey) -> Self {
        Self {
            store,
            key,
            tombstones: Arc::new(DashMap::new()),
            next_tombstone: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn store(&self) -> &Arc<QueryCacheStore> {
        &self.store
    }

    /// Whether `id` was deleted since the last install.
    pub fn is_tombstoned(&self, id: &TaskId) -> bool {
        self.tombstones.contains_key(id)
    }

    /// Install a freshly fetched collection, replacing the entry wholesale.
    ///
    /// Optimistic entries missing from `collection` are gone afterwards,
    /// and so are all tombstones.
    pub fn install(&self, collection: Collection) -> Arc<Collection> {
        debug!(query = %self.key, tasks = collection.len(), "installing fetched collection");
        self.tombstones.clear();
        self.store.write(self.key.clone(), collection)
    }

    /// Merge a created task.
    ///
    /// An entry with the same id is replaced in place. When `supersedes`
    /// names a placeholder still in the list, the task takes over the
    /// placeholder's slot; if the real id is already present (a push event
    /// got there first) the placeholder is dropped instead. A task deleted
    /// since the last install only drops the placeholder.
    pub fn on_create(&self, task: &Task, supersedes: Option<&TaskId>) -> Reversal {
        let mut reversal = Reversal::Nothing;
        let mut tombstoned = false;
        let applied = self.store.replace_with(&self.key, |current| {
            let mut tasks = current.to_vec();
            let existing = current.position(&task.id);
            let placeholder = supersedes
                .filter(|p| **p != task.id)
                .and_then(|p| current.position(p));

            if self.tombstones.contains_key(&task.id) {
                tombstoned = true;
                tasks.remove(placeholder?);
                return Some(Collection::from_unique(tasks));
            }

            match (existing, placeholder) {
                (Some(i), Some(p)) => {
                    tasks[i] = task.clone();
                    tasks.remove(p);
                }
                (Some(i), None) => {
                    if tasks[i] == *task {
                        return None;
                    }
                    tasks[i] = task.clone();
                }
                (None, Some(p)) => tasks[p] = task.clone(),
                (None, None) => {
                    tasks.push(task.clone());
                    reversal = Reversal::RemoveTask(task.id.clone());
                }
            }
            Some(Collection::from_unique(tasks))
        });

        if tombstoned {
            debug!(
                id = %task.id,
                supersedes = ?supersedes,
                "create for deleted task, not installing"
            );
        } else if applied.is_some() {
            trace!(id = %task.id, supersedes = ?supersedes, "reconciled create");
        } else if self.store.contains(&self.key) {
            trace!(id = %task.id, "create already reflected");
        } else {
            self.skipped("create", &task.id);
        }
        reversal
    }

    /// Merge an update into the task with the patch's id.
    ///
    /// A task not in the list is left alone; the next fetch brings it in.
    pub fn on_update(&self, patch: &TaskPatch) -> Reversal {
        let mut reversal = Reversal::Nothing;
        let mut found = false;
        let applied = self.store.replace_with(&self.key, |current| {
            let i = current.position(&patch.id)?;
            found = true;
            let before = &current.as_slice()[i];
            let after = patch.apply_to(before);
            if after == *before {
                return None;
            }

            let mut previous = TaskPatch::new(patch.id.clone());
            let mut written = TaskPatch::new(patch.id.clone());
            if after.title != before.title {
                previous.title = Some(before.title.clone());
                written.title = Some(after.title.clone());
            }
            if after.description != before.description {
                previous.description = Some(before.description.clone());
                written.description = Some(after.description.clone());
            }
            reversal = Reversal::RestoreFields {
                previous,
                applied: written,
            };

            let mut tasks = current.to_vec();
            tasks[i] = after;
            Some(Collection::from_unique(tasks))
        });

        if !self.store.contains(&self.key) {
            self.skipped("update", &patch.id);
        } else if !found {
            debug!(id = %patch.id, "update for task not in cached list, ignoring");
        } else if applied.is_some() {
            trace!(id = %patch.id, "reconciled update");
        }
        reversal
    }

    /// Remove the task with this id and tombstone it.
    pub fn on_delete(&self, id: &TaskId) -> Reversal {
        let mut reversal = Reversal::Nothing;
        let applied = self.store.replace_with(&self.key, |current| {
            let tombstone = self.next_tombstone.fetch_add(1, Ordering::Relaxed);
            if self.tombstones.insert(id.clone(), tombstone).is_some() {
                // Already gone; the newer tombstone outranks pending undos.
                return None;
            }
            let Some(index) = current.position(id) else {
                reversal = Reversal::ClearTombstone {
                    id: id.clone(),
                    tombstone,
                };
                return None;
            };
            reversal = Reversal::RestoreTask {
                task: current.as_slice()[index].clone(),
                index,
                tombstone,
            };
            let tasks = current.iter().filter(|t| &t.id != id).cloned().collect();
            Some(Collection::from_unique(tasks))
        });

        if applied.is_some() {
            trace!(id = %id, "reconciled delete");
        } else if !self.store.contains(&self.key) {
            self.skipped("delete", id);
        }
        reversal
    }

    /// Route a pushed event to the matching procedure.
    pub fn apply(&self, event: &TaskEvent) -> Reversal {
        match event {
            TaskEvent::Created(task) => self.on_create(task, None),
            TaskEvent::Modified(task) => self.on_update(&TaskPatch::from(task.clone())),
            TaskEvent::Deleted(id) => self.on_delete(id),
        }
    }

    /// Undo an earlier step, touching only the task it changed.
    ///
    /// Changes other sources made to that task in the meantime are kept.
    pub fn revert(&self, reversal: &Reversal) {
        match reversal {
            Reversal::Nothing => {}
            Reversal::RemoveTask(id) => {
                let applied = self.store.replace_with(&self.key, |current| {
                    let index = current.position(id)?;
                    let mut tasks = current.to_vec();
                    tasks.remove(index);
                    Some(Collection::from_unique(tasks))
                });
                if applied.is_some() {
                    trace!(id = %id, "removed reverted create");
                }
            }
            Reversal::ClearTombstone { id, tombstone } => {
                self.tombstones.remove_if(id, |_, t| t == tombstone);
            }
            Reversal::RestoreFields { previous, applied } => {
                let restored = self.store.replace_with(&self.key, |current| {
                    let i = current.position(&previous.id)?;
                    let now = &current.as_slice()[i];
                    let mut undo = TaskPatch::new(previous.id.clone());
                    if applied.title.as_ref() == Some(&now.title) {
                        undo.title = previous.title.clone();
                    }
                    if applied.description.as_ref() == Some(&now.description) {
                        undo.description = previous.description.clone();
                    }
                    let after = undo.apply_to(now);
                    if after == *now {
                        return None;
                    }
                    let mut tasks = current.to_vec();
                    tasks[i] = after;
                    Some(Collection::from_unique(tasks))
                });
                if restored.is_some() {
                    trace!(id = %previous.id, "restored fields of reverted update");
                }
            }
            Reversal::RestoreTask {
                task,
                index,
                tombstone,
            } => {
                let applied = self.store.replace_with(&self.key, |current| {
                    // Deleted again or wiped by an install since this delete.
                    self.tombstones
                        .remove_if(&task.id, |_, t| t == tombstone)?;
                    if current.contains(&task.id) {
                        return None;
                    }
                    let mut tasks = current.to_vec();
                    tasks.insert((*index).min(tasks.len()), task.clone());
                    Some(Collection::from_unique(tasks))
                });
                if applied.is_some() {
                    trace!(id = %task.id, index, "restored deleted task");
                } else {
                    debug!(id = %task.id, "deleted task not restored");
                }
            }
        }
    }

    /// Current snapshot of the reconciled query.
    pub fn snapshot(&self) -> Option<Arc<Collection>> {
        self.store.read(&self.key)
    }

    fn skipped(&self, procedure: &'static str, id: &TaskId) {
        debug!(
            query = %self.key,
            procedure,
            id = %id,
            "reconciliation skipped: query not cached yet"
        );
    }
}
