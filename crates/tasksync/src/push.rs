//! Subscription listener feeding push events into the router.
//!
//! One long-running task per channel. Each holds a subscription open,
//! turns every streamed payload into a [`TaskEvent`] and dispatches it.
//! When the stream ends or fails the listener reconnects with exponential
//! backoff until the shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::TaskSyncError;
use crate::operations::subscription_for;
use crate::router::SubscriptionRouter;
use crate::transport::{GraphqlResponse, GraphqlTransport};
use crate::types::{Channel, Task, TaskEvent, TaskId};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How one subscription session ended.
#[derive(Debug)]
enum StreamEnd {
    Shutdown,
    Closed { delivered: usize },
    Failed { delivered: usize, error: TaskSyncError },
}

/// Keeps the three task subscriptions open and routes what they deliver.
pub struct PushListener<T> {
    transport: Arc<T>,
    router: Arc<SubscriptionRouter>,
    max_backoff: Duration,
}

impl<T: GraphqlTransport + 'static> PushListener<T> {
    pub fn new(transport: Arc<T>, router: Arc<SubscriptionRouter>) -> Self {
        Self {
            transport,
            router,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Cap for the reconnect delay.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(INITIAL_BACKOFF);
        self
    }

    /// Listen on one channel until shutdown.
    ///
    /// A dropped shutdown sender counts as shutdown.
    pub async fn run(&self, channel: Channel, mut shutdown_rx: watch::Receiver<bool>) {
        let op = subscription_for(channel);
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *shutdown_rx.borrow() {
                info!(%channel, "push listener shutting down");
                return;
            }

            info!(%channel, operation = op.name, "subscribing");
            let end = match self.transport.subscribe(op, json!({})).await {
                Ok(stream) => self.process(channel, stream, &mut shutdown_rx).await,
                Err(error) => StreamEnd::Failed { delivered: 0, error },
            };

            match end {
                StreamEnd::Shutdown => {
                    info!(%channel, "push listener received shutdown signal");
                    return;
                }
                StreamEnd::Closed { delivered } => {
                    info!(%channel, delivered, "subscription closed by server, reconnecting");
                    if delivered > 0 {
                        backoff = INITIAL_BACKOFF;
                    }
                }
                StreamEnd::Failed { delivered, error } => {
                    error!(%channel, delivered, error = %error, "subscription error, reconnecting");
                    if delivered > 0 {
                        backoff = INITIAL_BACKOFF;
                    }
                }
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(%channel, "push listener shutting down");
                        return;
                    }
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            backoff = (backoff * 2).min(self.max_backoff);
        }
    }

    /// Start one listener task per channel.
    pub fn spawn_all(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        Channel::ALL
            .into_iter()
            .map(|channel| {
                let listener = Arc::clone(&self);
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { listener.run(channel, rx).await })
            })
            .collect()
    }

    async fn process(
        &self,
        channel: Channel,
        mut stream: BoxStream<'static, Result<GraphqlResponse, TaskSyncError>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> StreamEnd {
        let mut delivered = 0;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return StreamEnd::Shutdown;
                    }
                }

                item = stream.next() => {
                    match item {
                        Some(Ok(response)) => match parse_event(channel, &response) {
                            Ok(event) => {
                                let observers = self.router.dispatch(&event);
                                debug!(
                                    %channel,
                                    id = %event.task_id(),
                                    observers,
                                    "push event dispatched"
                                );
                                delivered += 1;
                            }
                            Err(e) => {
                                warn!(%channel, error = %e, "skipping malformed push payload")
                            }
                        },
                        Some(Err(error)) => return StreamEnd::Failed { delivered, error },
                        None => return StreamEnd::Closed { delivered },
                    }
                }
            }
        }
    }
}

/// Turn one subscription payload into an event for `channel`.
pub fn parse_event(
    channel: Channel,
    response: &GraphqlResponse,
) -> Result<TaskEvent, TaskSyncError> {
    let field = subscription_for(channel).root_field;
    let value = response.require(field)?;
    if !response.errors.is_empty() {
        warn!(
            %channel,
            errors = response.errors.len(),
            "push payload carried errors alongside data"
        );
    }

    match channel {
        Channel::Created => {
            let task: Task = serde_json::from_value(value.clone())?;
            Ok(TaskEvent::Created(task))
        }
        Channel::Modified => {
            let task: Task = serde_json::from_value(value.clone())?;
            Ok(TaskEvent::Modified(task))
        }
        Channel::Deleted => TaskId::from_value(value)
            .map(TaskEvent::Deleted)
            .ok_or(TaskSyncError::MissingField(field)),
    }
}
