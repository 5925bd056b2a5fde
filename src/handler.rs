//! Capability traits for reacting to events as they are persisted.
//!
//! These are the store-side hooks [`crate::store::postgres::event_store::PgStore::persist`]
//! drives on every successful append: [`TransactionalEventHandler`]s run inside the same
//! database transaction as the write (so a failure rolls the events back too),
//! [`EventHandler`]s run best-effort after commit. [`ReplayableEventHandler`] marks a handler
//! safe to invoke again from the first event of an aggregate's history, which the rebuilder
//! ([`crate::rebuilder`]) requires.

use async_trait::async_trait;

use crate::aggregate::Aggregate;
use crate::store::StoreEvent;

/// Reacts to a persisted event outside the writing transaction: updates to caches, search
/// indexes, or anything else that does not need to be atomic with the write.
///
/// Handlers must tolerate being called more than once for the same event (the store does not
/// guarantee exactly-once delivery to this hook — a process crash between commit and the handler
/// call means the event simply never reaches it) and, if implementing [`ReplayableEventHandler`],
/// being called again for events it has already seen.
#[async_trait]
pub trait EventHandler<A>: Send + Sync
where
    A: Aggregate,
{
    /// Reacts to a freshly persisted event. Errors are logged by the caller; a handler has no way
    /// to fail the write that already committed.
    async fn handle(&self, event: &StoreEvent<A::Event>);

    /// Removes any state this handler derived from the given aggregate instance. Called when the
    /// aggregate itself is deleted.
    async fn delete(&self, aggregate_id: uuid::Uuid);

    /// Identifies this handler in logs and metrics. Defaults to its Rust type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An [`EventHandler`] explicitly declared safe to run against an aggregate's full history, not
/// just newly persisted events — used by the offline rebuilder to regenerate a read model from
/// scratch.
///
/// Marker-only: any [`EventHandler`] that is idempotent per aggregate instance (its final state
/// depends only on the set of events applied, not on how many times or in what partial order they
/// were each applied) can implement this safely.
pub trait ReplayableEventHandler<A>: EventHandler<A>
where
    A: Aggregate,
{
}

/// Reacts to a persisted event *inside* the same database transaction as the write, using the
/// same executor so a handler failure rolls the append back with it.
///
/// `Executor` is the storage backend's in-transaction handle (e.g. `&mut sqlx::PgConnection`);
/// `Error` is the handler's own error type, which the caller is expected to fold into its own
/// store error on failure.
#[async_trait]
pub trait TransactionalEventHandler<A, Error, Executor>: Send + Sync
where
    A: Aggregate,
    Executor: Send,
{
    /// Reacts to an event about to be committed, using the same transaction.
    async fn handle(&self, event: &StoreEvent<A::Event>, executor: &mut Executor) -> Result<(), Error>;

    /// Removes any state this handler derived from the given aggregate instance, in the same
    /// transaction as the aggregate's deletion.
    async fn delete(&self, aggregate_id: uuid::Uuid, executor: &mut Executor) -> Result<(), Error>;

    /// Identifies this handler in logs and metrics. Defaults to its Rust type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
