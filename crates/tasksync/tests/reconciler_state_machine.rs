//! Stateful property testing for cache reconciliation.
//!
//! Uses proptest-state-machine to drive the reconciler with interleaved
//! fetches, optimistic round trips, failed mutations, push events and
//! evictions. The reference model is a plain `Option<Vec<Task>>`:
//!
//! - `None` until the first fetch; every procedure is a no-op meanwhile
//! - Creates replace by id or append, unless the id was deleted since the
//!   last fetch
//! - Updates rewrite fields by id
//! - Deletes filter by id and tombstone it
//! - Failed mutations leave no trace, except where a push changed the same
//!   task while they were in flight

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};

use tasksync::{
    Collection, QueryCacheStore, QueryKey, Reconciler, Task, TaskEvent, TaskId, TaskPatch,
};

/// Operations that can happen to the cached list.
#[derive(Debug, Clone)]
pub enum CacheOperation {
    /// Authoritative fetch replacing the entry.
    Fetch(Vec<Task>),
    /// Push event for a created task.
    PushCreated(Task),
    /// Push event for a modified task.
    PushModified(Task),
    /// Push event for a deleted task.
    PushDeleted(TaskId),
    /// Optimistic create followed by its confirmation.
    CreateRoundTrip(Task),
    /// Optimistic create whose mutation failed.
    FailedCreate { title: String },
    /// Optimistic update followed by its confirmation.
    UpdateRoundTrip(TaskPatch),
    /// Optimistic update whose mutation failed.
    FailedUpdate(TaskPatch),
    /// Optimistic delete whose mutation failed.
    FailedDelete(TaskId),
    /// Optimistic update, a push modifying the same task, then failure.
    FailedUpdateAfterPush { patch: TaskPatch, pushed: Task },
    /// Optimistic delete, a push deleting the same task, then failure.
    FailedDeleteAfterPush(TaskId),
    /// Optimistic create; the service pushes the create and a delete of
    /// it before the confirmation arrives.
    CreateDeletedBeforeConfirm(Task),
    /// Drop the entry (cache reset).
    Evict,
}

/// Reference model: the expected list, or `None` while cold, plus the ids
/// deleted since the last fetch.
#[derive(Clone, Debug, Default)]
pub struct CacheModel {
    pub tasks: Option<Vec<Task>>,
    pub tombstones: HashSet<TaskId>,
}

impl CacheModel {
    fn upsert(&mut self, task: &Task) {
        if self.tombstones.contains(&task.id) {
            return;
        }
        if let Some(tasks) = &mut self.tasks {
            match tasks.iter_mut().find(|t| t.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        }
    }

    fn patch(&mut self, patch: &TaskPatch) {
        if let Some(tasks) = &mut self.tasks
            && let Some(existing) = tasks.iter_mut().find(|t| t.id == patch.id)
        {
            *existing = patch.apply_to(existing);
        }
    }

    fn remove(&mut self, id: &TaskId) {
        if let Some(tasks) = &mut self.tasks {
            tasks.retain(|t| &t.id != id);
            self.tombstones.insert(id.clone());
        }
    }

    /// A failed update whose task was pushed in the meantime: a field goes
    /// back only if it still holds the value the update wrote.
    fn update_undone_after_push(&mut self, patch: &TaskPatch, pushed: &Task) {
        let Some(tasks) = &mut self.tasks else {
            return;
        };
        let Some(task) = tasks.iter_mut().find(|t| t.id == patch.id) else {
            return;
        };
        let before = task.clone();
        let optimistic = patch.apply_to(&before);
        let mut result = Task {
            id: before.id.clone(),
            title: pushed.title.clone(),
            description: pushed.description.clone(),
        };
        if optimistic.title != before.title && result.title == optimistic.title {
            result.title = before.title.clone();
        }
        if optimistic.description != before.description
            && result.description == optimistic.description
        {
            result.description = before.description.clone();
        }
        *task = result;
    }
}

fn id_strategy() -> impl Strategy<Value = TaskId> {
    (1u8..7).prop_map(|n| TaskId(n.to_string()))
}

fn text_strategy() -> impl Strategy<Value = String> {
    "[a-d]{0,3}"
}

fn task_strategy() -> impl Strategy<Value = Task> {
    (id_strategy(), text_strategy(), text_strategy()).prop_map(|(id, title, description)| Task {
        id,
        title,
        description,
    })
}

fn patch_strategy() -> impl Strategy<Value = TaskPatch> {
    (
        id_strategy(),
        proptest::option::of(text_strategy()),
        proptest::option::of(text_strategy()),
    )
        .prop_map(|(id, title, description)| TaskPatch { id, title, description })
}

impl ReferenceStateMachine for CacheModel {
    type State = Self;
    type Transition = CacheOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            2 => prop::collection::vec(task_strategy(), 0..6).prop_map(CacheOperation::Fetch),
            3 => task_strategy().prop_map(CacheOperation::PushCreated),
            2 => task_strategy().prop_map(CacheOperation::PushModified),
            2 => id_strategy().prop_map(CacheOperation::PushDeleted),
            3 => task_strategy().prop_map(CacheOperation::CreateRoundTrip),
            1 => text_strategy().prop_map(|title| CacheOperation::FailedCreate { title }),
            2 => patch_strategy().prop_map(CacheOperation::UpdateRoundTrip),
            1 => patch_strategy().prop_map(CacheOperation::FailedUpdate),
            1 => id_strategy().prop_map(CacheOperation::FailedDelete),
            1 => (patch_strategy(), text_strategy(), text_strategy()).prop_map(
                |(patch, title, description)| CacheOperation::FailedUpdateAfterPush {
                    pushed: Task {
                        id: patch.id.clone(),
                        title,
                        description,
                    },
                    patch,
                }
            ),
            1 => id_strategy().prop_map(CacheOperation::FailedDeleteAfterPush),
            1 => task_strategy().prop_map(CacheOperation::CreateDeletedBeforeConfirm),
            1 => Just(CacheOperation::Evict),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            CacheOperation::Fetch(tasks) => {
                // Duplicate ids in a response keep the first slot and the
                // last fields.
                let mut deduped: Vec<Task> = Vec::new();
                for task in tasks {
                    match deduped.iter_mut().find(|t| t.id == task.id) {
                        Some(existing) => *existing = task.clone(),
                        None => deduped.push(task.clone()),
                    }
                }
                state.tasks = Some(deduped);
                state.tombstones.clear();
            }
            CacheOperation::PushCreated(task) | CacheOperation::CreateRoundTrip(task) => {
                state.upsert(task);
            }
            CacheOperation::PushModified(task) => state.patch(&TaskPatch::from(task.clone())),
            CacheOperation::UpdateRoundTrip(patch) => state.patch(patch),
            CacheOperation::PushDeleted(id) | CacheOperation::FailedDeleteAfterPush(id) => {
                state.remove(id)
            }
            CacheOperation::CreateDeletedBeforeConfirm(task) => state.remove(&task.id),
            CacheOperation::FailedUpdateAfterPush { patch, pushed } => {
                state.update_undone_after_push(patch, pushed)
            }
            CacheOperation::FailedCreate { .. }
            | CacheOperation::FailedUpdate(_)
            | CacheOperation::FailedDelete(_) => {}
            CacheOperation::Evict => state.tasks = None,
        }
        state
    }
}

pub struct ReconcilerHarness {
    store: Arc<QueryCacheStore>,
    reconciler: Reconciler,
}

impl ReconcilerHarness {
    fn new() -> Self {
        let store = QueryCacheStore::new();
        let reconciler = Reconciler::new(Arc::clone(&store));
        Self { store, reconciler }
    }

    fn apply_operation(&self, op: &CacheOperation) {
        let r = &self.reconciler;
        match op {
            CacheOperation::Fetch(tasks) => {
                r.install(Collection::from_tasks(tasks.clone()));
            }
            CacheOperation::PushCreated(task) => {
                r.apply(&TaskEvent::Created(task.clone()));
            }
            CacheOperation::PushModified(task) => {
                r.apply(&TaskEvent::Modified(task.clone()));
            }
            CacheOperation::PushDeleted(id) => {
                r.apply(&TaskEvent::Deleted(id.clone()));
            }
            CacheOperation::CreateRoundTrip(task) => {
                let placeholder = TaskId::placeholder();
                let provisional = Task {
                    id: placeholder.clone(),
                    ..task.clone()
                };
                r.on_create(&provisional, None);
                r.on_create(task, Some(&placeholder));
            }
            CacheOperation::FailedCreate { title } => {
                let provisional = Task::new(TaskId::placeholder(), title.clone(), "");
                let reversal = r.on_create(&provisional, None);
                r.revert(&reversal);
            }
            CacheOperation::UpdateRoundTrip(patch) => {
                r.on_update(patch);
                if let Some(confirmed) = r.snapshot().and_then(|c| c.get(&patch.id).cloned()) {
                    r.on_update(&TaskPatch::from(confirmed));
                }
            }
            CacheOperation::FailedUpdate(patch) => {
                let reversal = r.on_update(patch);
                r.revert(&reversal);
            }
            CacheOperation::FailedDelete(id) => {
                let reversal = r.on_delete(id);
                r.revert(&reversal);
            }
            CacheOperation::FailedUpdateAfterPush { patch, pushed } => {
                let reversal = r.on_update(patch);
                r.apply(&TaskEvent::Modified(pushed.clone()));
                r.revert(&reversal);
            }
            CacheOperation::FailedDeleteAfterPush(id) => {
                let reversal = r.on_delete(id);
                r.apply(&TaskEvent::Deleted(id.clone()));
                r.revert(&reversal);
            }
            CacheOperation::CreateDeletedBeforeConfirm(task) => {
                let placeholder = TaskId::placeholder();
                let provisional = Task {
                    id: placeholder.clone(),
                    ..task.clone()
                };
                r.on_create(&provisional, None);
                r.apply(&TaskEvent::Created(task.clone()));
                r.apply(&TaskEvent::Deleted(task.id.clone()));
                r.on_create(task, Some(&placeholder));
            }
            CacheOperation::Evict => {
                self.store.evict(&QueryKey::all_tasks());
            }
        }
    }

    fn verify_invariants(&self, model: &CacheModel) {
        let actual = self.reconciler.snapshot().map(|c| c.to_vec());
        assert_eq!(actual, model.tasks, "cached list diverged from model");

        if let Some(tasks) = actual {
            let mut ids: Vec<_> = tasks.iter().map(|t| t.id.clone()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), tasks.len(), "duplicate ids in snapshot");
            assert!(
                tasks.iter().all(|t| !t.id.is_placeholder()),
                "placeholder left behind after its mutation settled"
            );
        }

        for n in 1u8..7 {
            let id = TaskId(n.to_string());
            assert_eq!(
                self.reconciler.is_tombstoned(&id),
                model.tombstones.contains(&id),
                "tombstone for {} diverged from model",
                id
            );
        }
    }
}

impl StateMachineTest for ReconcilerHarness {
    type SystemUnderTest = Self;
    type Reference = CacheModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn reconciler_state_machine_test(sequential 1..60 => ReconcilerHarness);
}

// Targeted properties

fn seeded(tasks: Vec<Task>) -> Reconciler {
    let store = QueryCacheStore::new();
    store.write(QueryKey::all_tasks(), Collection::from_tasks(tasks));
    Reconciler::new(store)
}

proptest! {
    #[test]
    fn create_is_idempotent(
        initial in prop::collection::vec(task_strategy(), 0..6),
        task in task_strategy(),
    ) {
        let once = seeded(initial.clone());
        once.on_create(&task, None);

        let twice = seeded(initial);
        twice.on_create(&task, None);
        twice.on_create(&task, None);

        let snapshot = twice.snapshot().unwrap();
        prop_assert_eq!(snapshot.iter().filter(|t| t.id == task.id).count(), 1);
        prop_assert_eq!(snapshot.get(&task.id), Some(&task));
        prop_assert_eq!(once.snapshot(), twice.snapshot());
    }

    #[test]
    fn delete_is_idempotent(
        initial in prop::collection::vec(task_strategy(), 0..6),
        id in id_strategy(),
    ) {
        let r = seeded(initial);
        r.on_delete(&id);
        let after_first = r.snapshot();
        r.on_delete(&id);
        prop_assert_eq!(r.snapshot(), after_first);
    }

    #[test]
    fn create_and_delete_commute(
        initial in prop::collection::vec(task_strategy(), 0..6),
        created in task_strategy(),
        deleted in id_strategy(),
    ) {
        prop_assume!(created.id != deleted);

        let forward = seeded(initial.clone());
        forward.on_create(&created, None);
        forward.on_delete(&deleted);

        let backward = seeded(initial);
        backward.on_delete(&deleted);
        backward.on_create(&created, None);

        prop_assert_eq!(forward.snapshot(), backward.snapshot());
    }

    #[test]
    fn cold_cache_stays_absent(task in task_strategy(), patch in patch_strategy()) {
        let store = QueryCacheStore::new();
        let r = Reconciler::new(Arc::clone(&store));

        r.on_create(&task, None);
        r.on_update(&patch);
        r.on_delete(&task.id);

        prop_assert!(r.snapshot().is_none());
        prop_assert!(store.is_empty());
    }
}
