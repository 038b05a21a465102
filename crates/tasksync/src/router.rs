//! Fan-out of push events to registered observers.
//!
//! Each channel keeps its own observer list. The router does not touch the
//! cache; reconciliation on push is done by registering the reconciler as
//! an observer (see [`crate::TaskCollection::reconcile_push_events`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::types::{Channel, Task, TaskEvent, TaskId};

/// Callback for push events.
pub type Observer = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId {
    channel: Channel,
    seq: u64,
}

impl ObserverId {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

/// Routes push events to observers, per channel, in registration order.
#[derive(Default)]
pub struct SubscriptionRouter {
    observers: DashMap<Channel, Vec<(u64, Observer)>>,
    next_seq: AtomicU64,
}

impl SubscriptionRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an observer on a channel.
    pub fn register(&self, channel: Channel, observer: Observer) -> ObserverId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.observers
            .entry(channel)
            .or_default()
            .push((seq, observer));
        trace!(%channel, seq, "observer registered");
        ObserverId { channel, seq }
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let Some(mut list) = self.observers.get_mut(&id.channel) else {
            return false;
        };
        let before = list.len();
        list.retain(|(seq, _)| *seq != id.seq);
        before != list.len()
    }

    /// Observe created tasks.
    pub fn on_created<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.register(
            Channel::Created,
            Arc::new(move |event| {
                if let TaskEvent::Created(task) = event {
                    f(task)
                }
            }),
        )
    }

    /// Observe modified tasks.
    pub fn on_modified<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.register(
            Channel::Modified,
            Arc::new(move |event| {
                if let TaskEvent::Modified(task) = event {
                    f(task)
                }
            }),
        )
    }

    /// Observe deleted task ids.
    pub fn on_deleted<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&TaskId) + Send + Sync + 'static,
    {
        self.register(
            Channel::Deleted,
            Arc::new(move |event| {
                if let TaskEvent::Deleted(id) = event {
                    f(id)
                }
            }),
        )
    }

    /// Number of observers on a channel.
    pub fn observer_count(&self, channel: Channel) -> usize {
        self.observers.get(&channel).map(|l| l.len()).unwrap_or(0)
    }

    /// Deliver an event to every observer of its channel.
    ///
    /// Returns how many observers were called. The list is copied first, so
    /// observers may register or unregister while being called; such
    /// changes apply from the next event.
    pub fn dispatch(&self, event: &TaskEvent) -> usize {
        let channel = event.channel();
        let observers: Vec<Observer> = match self.observers.get(&channel) {
            Some(list) => list.iter().map(|(_, o)| Arc::clone(o)).collect(),
            None => Vec::new(),
        };

        for observer in &observers {
            observer(event);
        }
        trace!(
            %channel,
            id = %event.task_id(),
            observers = observers.len(),
            "push event dispatched"
        );
        observers.len()
    }
}
