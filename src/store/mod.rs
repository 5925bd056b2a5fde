//! The event log (C2): an append-only store of events with optimistic
//! per-aggregate version control and a gap-tolerant, monotonic global
//! ordering shared by every aggregate type.
//!
//! Two contracts split the read/write surface:
//!
//! - [`EventStore`] is the per-aggregate-type façade — strongly typed over a
//!   concrete [`crate::Aggregate`], used by [`crate::AggregateManager`] and
//!   the [`crate::coordinator::TransactionCoordinator`] to load and persist
//!   one aggregate instance at a time.
//! - [`EventLog`] is the type-erased, cross-aggregate reader — used by the
//!   projection engine (C7) to poll the whole log in `global_sequence` order
//!   regardless of which aggregate type produced each row.
//!
//! Both are implemented, behind the `postgres` feature, against a single
//! shared `events` table (see [`crate::sql::migrations`]): aggregates are not
//! partitioned into one table per type, because the projection engine must
//! be able to observe a single total order across all of them.

use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

#[cfg(feature = "postgres")]
pub mod postgres;

use crate::state::AggregateState;
use crate::{GlobalSequence, SequenceNumber};

/// Marker trait for every [`EventStoreLockGuard`].
///
/// Implementors should unlock concurrent access to the guarded resource, when dropped.
pub trait UnlockOnDrop: Send + Sync + 'static {}

/// Lock guard preventing concurrent access to a resource.
///
/// The lock is released when this guard is dropped.
pub struct EventStoreLockGuard(Box<dyn UnlockOnDrop>);

impl EventStoreLockGuard {
    /// Creates a new instance from any [`UnlockOnDrop`].
    #[must_use]
    pub fn new(lock: impl UnlockOnDrop) -> Self {
        Self(Box::new(lock))
    }
}

/// An `EventStore` is responsible for persisting the events an aggregate
/// emits, and loading the events that represent an aggregate instance's
/// history, scoped to a single concrete [`crate::Aggregate`] type.
#[async_trait]
pub trait EventStore {
    type Aggregate: crate::Aggregate;
    type Error: std::error::Error;

    /// Acquires a lock for the given aggregate, or waits for outstanding guards to be released.
    ///
    /// Used to prevent concurrent access to the aggregate state.
    /// Note that any process which does *not* `lock` will get immediate (possibly shared!) access.
    /// ALL accesses (regardless of this guard) are subject to the usual optimistic locking strategy on write.
    async fn lock(&self, aggregate_id: Uuid) -> Result<EventStoreLockGuard, Self::Error>;

    /// Loads the events that an aggregate instance has emitted in the past, ordered by
    /// `aggregate_version` ascending.
    async fn by_aggregate_id(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>>, Self::Error>;

    /// The highest `aggregate_version` persisted for this aggregate instance, or 0 if it has no
    /// events yet.
    async fn get_version(&self, aggregate_id: Uuid) -> Result<SequenceNumber, Self::Error>;

    /// Persists multiple events into the database in a single transaction - either all the events
    /// are persisted correctly, or none are. `aggregate_state.sequence_number()` is taken as the
    /// expected version before these events; if the row already at that version does not match (a
    /// concurrent writer beat us to it), implementations surface a concurrency conflict instead of
    /// applying a partial write.
    ///
    /// Persisting events may additionally trigger configured event handlers (transactional and
    /// non-transactional), stage rows in the transactional outbox, and publish to configured event
    /// buses.
    async fn persist(
        &self,
        aggregate_state: &mut AggregateState<<Self::Aggregate as crate::Aggregate>::State>,
        events: Vec<<Self::Aggregate as crate::Aggregate>::Event>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>>, Self::Error>;

    /// Publish multiple events on the configured events buses.
    async fn publish(&self, store_events: &[StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>]);

    /// Delete all events from events store related to given `aggregate_id`.
    ///
    /// Moreover it should delete all the read side projections triggered by event handlers.
    async fn delete(&self, aggregate_id: Uuid) -> Result<(), Self::Error>;
}

/// Blanket implementation making an [`EventStore`] every (smart) pointer to an [`EventStore`],
/// e.g. `&Store`, `Box<Store>`, `Arc<Store>`.
#[async_trait]
impl<A, E, T, S> EventStore for T
where
    A: crate::Aggregate,
    A::Event: Send + Sync,
    A::State: Send,
    E: std::error::Error,
    S: EventStore<Aggregate = A, Error = E> + ?Sized,
    T: Deref<Target = S> + Sync,
    for<'a> A::Event: 'a,
{
    type Aggregate = A;
    type Error = E;

    async fn lock(&self, aggregate_id: Uuid) -> Result<EventStoreLockGuard, Self::Error> {
        self.deref().lock(aggregate_id).await
    }

    async fn by_aggregate_id(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>>, Self::Error> {
        self.deref().by_aggregate_id(aggregate_id).await
    }

    async fn get_version(&self, aggregate_id: Uuid) -> Result<SequenceNumber, Self::Error> {
        self.deref().get_version(aggregate_id).await
    }

    async fn persist(
        &self,
        aggregate_state: &mut AggregateState<<Self::Aggregate as crate::Aggregate>::State>,
        events: Vec<<Self::Aggregate as crate::Aggregate>::Event>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>>, Self::Error> {
        self.deref().persist(aggregate_state, events, metadata).await
    }

    async fn publish(&self, events: &[StoreEvent<<Self::Aggregate as crate::Aggregate>::Event>]) {
        self.deref().publish(events).await
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), Self::Error> {
        self.deref().delete(aggregate_id).await
    }
}

/// A `StoreEvent` contains the payload (the original, strongly-typed event) alongside the envelope
/// metadata the log attaches at write time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoreEvent<Event> {
    /// Uniquely identifies an event among all events emitted from all aggregates.
    pub id: Uuid,
    /// The aggregate instance that emitted the event.
    pub aggregate_id: Uuid,
    /// Short string discriminator of the owning aggregate type.
    pub aggregate_type: String,
    /// The original, emitted, event.
    pub payload: Event,
    /// Optional correlation/causation/tenant metadata attached at append time.
    pub metadata: Option<serde_json::Value>,
    /// The timestamp the store assigned when the event was persisted.
    pub occurred_on: DateTime<Utc>,
    /// The version of this event within its specific aggregate instance.
    pub sequence_number: SequenceNumber,
    /// The store-assigned, cross-aggregate monotonic ordering key.
    pub global_sequence: GlobalSequence,
    /// The event's schema version, after any upcasting has been applied.
    pub version: Option<i32>,
}

impl<Event> StoreEvent<Event> {
    /// Returns the sequence number of the event, within its specific aggregate instance.
    pub const fn sequence_number(&self) -> &SequenceNumber {
        &self.sequence_number
    }

    /// Returns the original, emitted, event.
    pub const fn payload(&self) -> &Event {
        &self.payload
    }
}

/// A type-erased row of the event log: the payload has not been routed to a concrete `Event` type
/// yet, only upcast to its latest JSON shape. This is what the projection engine (C7) and the
/// rebuilder consume, since they operate across every aggregate type in one pass.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_version: SequenceNumber,
    pub global_sequence: GlobalSequence,
    pub event_type: String,
    pub event_version: i32,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub size_bytes: i64,
}

/// Criteria for [`EventLog::stream_by_metadata`]: every key/value pair must match a key present in
/// the row's `metadata` JSON object.
#[derive(Debug, Clone, Default)]
pub struct MetadataCriteria(pub Vec<(String, serde_json::Value)>);

/// Aggregate counts, used by [`EventLog::stats`].
#[derive(Debug, Clone, Default)]
pub struct EventLogStats {
    pub total_events: i64,
    pub by_aggregate_type: Vec<(String, i64)>,
    pub by_event_type: Vec<(String, i64)>,
}

/// The type-erased, cross-aggregate-type reader over the whole event log, ordered by
/// `global_sequence`. Implementations must honour monotonicity (never yield a lower
/// `global_sequence` than one already yielded in the same stream) but are explicitly allowed to
/// skip values (rolled-back transactions burn a sequence value with no row to show for it).
#[async_trait]
pub trait EventLog {
    type Error: std::error::Error;

    /// The current head of the log: the highest `global_sequence` assigned so far, or 0 if empty.
    async fn current_global_sequence(&self) -> Result<GlobalSequence, Self::Error>;

    /// All events with `global_sequence > from_sequence`, in ascending order. Finite at the current
    /// head; callers restart it from any previously observed position.
    fn stream_all(&self, from_sequence: GlobalSequence) -> BoxStream<'_, Result<EventEnvelope, Self::Error>>;

    /// As [`EventLog::stream_all`], filtered to the given `event_type`s.
    fn stream_by_event_types<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        event_types: &'a [String],
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>>;

    /// As [`EventLog::stream_all`], filtered to the given `aggregate_type`s.
    fn stream_by_aggregate_types<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        aggregate_types: &'a [String],
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>>;

    /// As [`EventLog::stream_all`], filtered to `created_at` within `[from, to]`.
    fn stream_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxStream<'_, Result<EventEnvelope, Self::Error>>;

    /// As [`EventLog::stream_all`], filtered to rows whose `metadata` matches every criterion.
    fn stream_by_metadata<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        criteria: &'a MetadataCriteria,
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>>;

    /// Totals by aggregate type and event type, for observability.
    async fn stats(&self) -> Result<EventLogStats, Self::Error>;
}
