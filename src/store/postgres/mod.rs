pub use builder::*;
pub use event_log::PgEventLog;
pub use event_store::*;
pub use outbox::PgOutboxStore;
pub use projection::PgProjectionCursorStore;
pub use schema::*;
pub use snapshot::PgSnapshotStore;

mod builder;
mod event_log;
mod event_store;
pub mod outbox;
pub mod persistable;
pub mod projection;
mod schema;
pub mod snapshot;

// Trait aliases are experimental. See issue #41517 <https://github.com/rust-lang/rust/issues/41517>
// trait PgTransactionalEventHandler<A> = TransactionalEventHandler<A, PgStoreError, PgConnection> where A: Aggregate;

/// Postgres SQLSTATE for a unique constraint violation, used to recognize an optimistic
/// concurrency conflict on the `(aggregate_id, sequence_number)` constraint.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

#[derive(thiserror::Error, Debug)]
pub enum PgStoreError {
    /// Sql error
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// Serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A concurrent writer already persisted an event at this aggregate's expected version; the
    /// caller should reload the aggregate and retry.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, but {actual} is already persisted")]
    ConcurrencyConflict {
        aggregate_id: uuid::Uuid,
        expected: crate::SequenceNumber,
        actual: crate::SequenceNumber,
    },
    /// The stored payload failed to decode: unknown event type, schema mismatch, or checksum
    /// mismatch.
    #[error(transparent)]
    Codec(#[from] crate::event::CodecError),
    /// Error while running a TransactionalEventHandler inside of the event store.
    #[error(transparent)]
    Custom(Box<dyn std::error::Error + Send + Sync>),
}

/// An outbox wired into a [`PgStore`], staging every persisted event for delivery to `destination`
/// in the same transaction as the write.
pub(crate) struct PgStoreOutbox {
    pub(crate) store: PgOutboxStore,
    pub(crate) destination: String,
    pub(crate) max_retries: i32,
}

impl PgStoreError {
    /// Whether `error` is a Postgres unique-violation on the events table's optimistic concurrency
    /// constraint `(aggregate_id, sequence_number)`. Callers that get `true` back should look up
    /// the aggregate's actual current version and build a [`PgStoreError::ConcurrencyConflict`]
    /// themselves, since that lookup needs a connection this (synchronous) check can't perform.
    pub(crate) fn is_concurrency_violation(error: &sqlx::Error) -> bool {
        matches!(error, sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some(UNIQUE_VIOLATION))
    }
}
