//! The snapshot store (C3): a periodic cache of an aggregate's folded state, so reconstruction can
//! replay a short tail of events instead of the full history.
//!
//! Grounded on `serverlesstechnology-cqrs`'s `persist::snapshot_store` for the `save`/
//! `load_latest` shape, adapted to this crate's `Arc<Inner>` + `RwLock`-guarded cache idiom (the
//! same shape [`crate::store::postgres::PgStore`] uses for its event handler list).

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Aggregate, SequenceNumber};

/// A snapshot of an aggregate instance's folded state as of a given `sequence_number`.
#[derive(Debug, Clone)]
pub struct Snapshot<State> {
    pub aggregate_id: Uuid,
    pub sequence_number: SequenceNumber,
    pub state: State,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

/// Errors raised by a [`SnapshotStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Storage(Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// When to take a new snapshot, evaluated after every successful [`crate::EventStore::persist`]
/// call.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotPolicy {
    /// Never snapshot automatically; only [`SnapshotStore::save`] calls made directly take one.
    Disabled,
    /// Snapshot every time an aggregate instance's `sequence_number` crosses a multiple of `every`.
    EveryNEvents { every: SequenceNumber },
}

impl SnapshotPolicy {
    /// Whether a snapshot should be taken given the version just before and after the events that
    /// were appended.
    pub fn should_snapshot(&self, previous_version: SequenceNumber, new_version: SequenceNumber) -> bool {
        match self {
            SnapshotPolicy::Disabled => false,
            SnapshotPolicy::EveryNEvents { every } if *every <= 0 => false,
            SnapshotPolicy::EveryNEvents { every } => (previous_version / every) != (new_version / every),
        }
    }
}

/// Stores and retrieves snapshots of an aggregate type's folded state.
#[async_trait]
pub trait SnapshotStore<A>: Send + Sync
where
    A: Aggregate,
{
    type Error: std::error::Error;

    /// Persists a snapshot. Implementations should keep only the latest snapshot per aggregate
    /// instance (or a bounded number of recent ones); compaction of older snapshots is an
    /// implementation detail, not part of this contract.
    async fn save(&self, snapshot: Snapshot<A::State>) -> Result<(), Self::Error>;

    /// Loads the most recent snapshot for this aggregate instance, if any.
    async fn load_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot<A::State>>, Self::Error>;

    /// Loads the most recent snapshot at or before `max_sequence_number`, if any. Used to replay a
    /// specific point in history (e.g. for debugging or audits) rather than the current state.
    async fn load_at_version(
        &self,
        aggregate_id: Uuid,
        max_sequence_number: SequenceNumber,
    ) -> Result<Option<Snapshot<A::State>>, Self::Error>;

    /// Deletes every snapshot for this aggregate instance. Called alongside
    /// [`crate::EventStore::delete`] when an aggregate instance itself is deleted.
    async fn delete(&self, aggregate_id: Uuid) -> Result<(), Self::Error>;

    /// Prunes old snapshots table-wide: per aggregate instance, keeps only the `keep_count` most
    /// recent snapshots and drops anything older than `max_age`, whichever rule is stricter. Not
    /// invoked automatically by [`SnapshotStore::save`] — callers run it on their own schedule (a
    /// cron job, an admin command), the same way [`crate::outbox::OutboxStore::gc_delivered`] is a
    /// standalone maintenance operation rather than something triggered by every write. Returns the
    /// number of snapshots deleted.
    async fn compact(&self, keep_count: u32, max_age: std::time::Duration) -> Result<u64, Self::Error>;
}
