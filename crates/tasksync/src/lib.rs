//! Local cache reconciliation for a collaborative task list.
//!
//! Keeps a client-side copy of the shared `allTasks` list consistent with
//! the remote GraphQL service while the user edits it optimistically and
//! other clients push changes.
//!
//! ## Features
//!
//! - **Store**: Query-keyed, snapshot-swapping cache of task collections
//! - **Reconciler**: Idempotent, reversible create/update/delete merges
//! - **Optimistic results**: Placeholder-backed stand-ins for pending mutations
//! - **Router**: Per-channel fan-out of push events to observers
//! - **Push listener**: Reconnecting subscription loop feeding the router
//! - **Facade**: `TaskCollection` tying fetch, mutations and observers together
//! - **HTTP transport**: reqwest queries/mutations, `graphql-transport-ws` subscriptions

mod client;
mod config;
mod error;
pub mod facade;
pub mod operations;
pub mod optimistic;
pub mod push;
pub mod reconciler;
pub mod router;
pub mod store;
pub mod transport;
mod types;

pub use client::HttpTransport;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::TaskSyncError;
pub use facade::{FetchOutcome, PendingMutation, TASK_TYPENAME, TaskCollection};
pub use operations::{Operation, OperationKind};
pub use optimistic::{MutationIntent, MutationRecord, OptimisticSynthesizer, ProvisionalResult};
pub use push::PushListener;
pub use reconciler::{Reconciler, Reversal};
pub use router::{Observer, ObserverId, SubscriptionRouter};
pub use store::{CacheUpdate, QueryCacheStore};
pub use transport::{GraphqlError, GraphqlResponse, GraphqlTransport};
pub use types::*;
