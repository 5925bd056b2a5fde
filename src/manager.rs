mod locked_load;

pub use locked_load::LockedLoad;

use uuid::Uuid;

use crate::state::ReplayError;
use crate::store::{EventStore, StoreEvent};
use crate::{Aggregate, AggregateState};

/// Either the store failed the operation, or folding the events it returned back onto the state
/// failed structurally (see [`crate::aggregate::AggregateError`]).
#[derive(Debug, thiserror::Error)]
pub enum ManagerError<E: std::error::Error> {
    #[error(transparent)]
    Store(#[from] E),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

impl<E> crate::coordinator::ConcurrencyConflictError for ManagerError<E>
where
    E: std::error::Error + crate::coordinator::ConcurrencyConflictError,
{
    fn is_concurrency_conflict(&self) -> bool {
        matches!(self, ManagerError::Store(error) if error.is_concurrency_conflict())
    }
}

/// Couples an [`Aggregate`] with an [`EventStore`] so commands can be validated, their resulting
/// events persisted, and an instance's state reconstructed by replaying its history.
///
/// The basic APIs are:
/// 1. `handle_command`
/// 2. `load`
/// 3. `lock_and_load`
pub struct AggregateManager<E>
where
    E: EventStore,
{
    event_store: E,
}

impl<E> AggregateManager<E>
where
    E: EventStore,
{
    /// Creates a new instance of an [`AggregateManager`].
    pub fn new(event_store: E) -> Self {
        Self { event_store }
    }

    /// Borrows the underlying store, for callers that need lower-level access (e.g. the
    /// transaction coordinator's retry loop).
    pub fn event_store(&self) -> &E {
        &self.event_store
    }

    /// Validates and handles the command onto the given state, then passes the resulting events to
    /// the store. The store transactionally persists them, recording them in the aggregate
    /// instance's history.
    ///
    /// On success, the updated aggregate state is returned.
    ///
    /// Returns two layers of errors:
    /// - `Err(_)` if the aggregate handled the command but the outcome failed to be recorded;
    /// - `Ok(Err(_))` if the aggregate denied the command.
    pub async fn handle_command(
        &self,
        aggregate_state: AggregateState<<E::Aggregate as Aggregate>::State>,
        command: <E::Aggregate as Aggregate>::Command,
    ) -> Result<Result<<E::Aggregate as Aggregate>::State, <E::Aggregate as Aggregate>::Error>, ManagerError<E::Error>> {
        self.handle_command_with_metadata(aggregate_state, command, None).await
    }

    /// As [`AggregateManager::handle_command`], additionally attaching `metadata` (correlation id,
    /// causation id, tenant, ...) to every event this command produces.
    pub async fn handle_command_with_metadata(
        &self,
        mut aggregate_state: AggregateState<<E::Aggregate as Aggregate>::State>,
        command: <E::Aggregate as Aggregate>::Command,
        metadata: Option<serde_json::Value>,
    ) -> Result<Result<<E::Aggregate as Aggregate>::State, <E::Aggregate as Aggregate>::Error>, ManagerError<E::Error>> {
        match <E::Aggregate as Aggregate>::handle_command(aggregate_state.inner(), command) {
            Err(domain_error) => Ok(Err(domain_error)),
            Ok(events) => match self.event_store.persist(&mut aggregate_state, events, metadata).await {
                Ok(store_events) => {
                    let state = aggregate_state
                        .apply_store_events::<E::Aggregate>(store_events, <E::Aggregate as Aggregate>::apply_event)
                        .map_err(ManagerError::Replay)?
                        .into_inner();
                    Ok(Ok(state))
                }
                Err(operational_error) => Err(ManagerError::Store(operational_error)),
            },
        }
    }

    /// Loads an aggregate instance from the event store, by applying previously persisted events
    /// onto the aggregate state in order of their sequence number.
    pub async fn load(
        &self,
        aggregate_id: impl Into<Uuid> + Send,
    ) -> Result<Option<AggregateState<<E::Aggregate as Aggregate>::State>>, ManagerError<E::Error>> {
        let aggregate_id: Uuid = aggregate_id.into();

        let store_events: Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>> =
            self.event_store.by_aggregate_id(aggregate_id).await?;

        Ok(if store_events.is_empty() {
            None
        } else {
            let aggregate_state = AggregateState::with_id(aggregate_id);
            Some(
                aggregate_state
                    .apply_store_events::<E::Aggregate>(store_events, <E::Aggregate as Aggregate>::apply_event)
                    .map_err(ManagerError::Replay)?,
            )
        })
    }

    /// Acquires a lock on this aggregate instance, then loads it from the event store, applying
    /// previously persisted events onto the aggregate state in order of their sequence number.
    ///
    /// The returned [`LockedLoad`] holds the outcome of the load and is responsible for correctly
    /// releasing the lock.
    pub async fn lock_and_load(
        &self,
        aggregate_id: impl Into<Uuid> + Send,
    ) -> Result<LockedLoad<<E::Aggregate as Aggregate>::State>, ManagerError<E::Error>> {
        let id = aggregate_id.into();
        let guard = self.event_store.lock(id).await?;
        let aggregate_state = self.load(id).await?;

        Ok(match aggregate_state {
            Some(mut aggregate_state) => {
                aggregate_state.set_lock(guard);
                LockedLoad::some(aggregate_state)
            }
            None => LockedLoad::none(id, guard),
        })
    }

    /// Deletes the aggregate instance, along with all its associated events and transactional read
    /// side projections, or fails leaving nothing deleted.
    pub async fn delete(&self, aggregate_id: impl Into<Uuid> + Send) -> Result<(), E::Error> {
        self.event_store.delete(aggregate_id.into()).await
    }
}
