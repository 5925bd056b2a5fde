//! Core runtime for building event-sourced services: an append-only event
//! log with optimistic concurrency, aggregate reconstruction from snapshot +
//! tail, a transactional outbox guaranteeing at-least-once publication, and a
//! cursor-based projection engine for derived read models.
//!
//! The storage-agnostic contracts ([`EventStore`], [`snapshot::SnapshotStore`],
//! [`outbox::OutboxStore`], [`projection::ProjectionCursorStore`]) live at the
//! crate root and in their respective modules; a Postgres implementation of
//! each ships behind the `postgres` feature (on by default).

pub use aggregate::Aggregate;
pub use event::{EventType, Upcaster};
pub use handler::{EventHandler, ReplayableEventHandler, TransactionalEventHandler};
pub use manager::AggregateManager;
pub use state::{AggregateRoot, AggregateState};
pub use store::{EventStore, EventStoreLockGuard, StoreEvent, UnlockOnDrop};

pub mod aggregate;
pub mod bus;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod handler;
pub mod manager;
pub mod outbox;
pub mod projection;
#[cfg(feature = "rebuilder")]
pub mod rebuilder;
#[cfg(feature = "sql")]
pub mod sql;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod tenant;
#[cfg(feature = "upcasting")]
pub mod upcasting;

/// An aggregate-local, strictly monotonic version number. The first event an
/// aggregate emits has version 1.
pub type SequenceNumber = i64;

/// A store-assigned, monotonic counter providing total order across every
/// aggregate in the log. Not guaranteed to be gap-free (rolled back
/// transactions burn values), only guaranteed to be monotonic.
pub type GlobalSequence = i64;
