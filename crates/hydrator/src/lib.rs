//! Hydration scheduler for snapcache.
//!
//! Pre-populates the reactive query cache and the snapshot store from a remote
//! backend without blocking interaction:
//! - [`Hydrator`] runs freshness-checked hydration jobs and seeds boot snapshots
//! - [`PriorityJobQueue`] and [`IdleTaskQueue`] schedule work behind an
//!   [`InteractionGate`]
//! - [`MutationGuard`] keeps hydration away from in-flight profile edits
//! - Realtime subscriptions follow the signed-in identity and invalidate
//!   the queries they cover

pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod query;
pub mod queue;
pub mod realtime;
pub mod remote;
pub mod scheduler;

pub use config::HydratorConfig;
pub use error::HydrateError;
pub use gate::{InteractionGate, ReadyGate};
pub use guard::{MutationGuard, MutationTicket};
pub use query::{MemoryQueryClient, QueryClient, query_keys};
pub use queue::{Enqueued, HydrationJob, IdleQueue, IdleTaskQueue, JobQueue, PriorityJobQueue};
pub use realtime::{MemoryRealtime, Realtime, RealtimeEvent, SubscriptionPattern};
pub use remote::Remote;
pub use scheduler::{Collaborators, HydrationOutcome, Hydrator, Identity, PreviewReport, SeedReport};
