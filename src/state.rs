//! In-memory representation of a single aggregate instance: its identity, its
//! current `sequence_number`, its folded [`crate::Aggregate::State`], and
//! (when acquired) the lock guarding it against concurrent writers.

use uuid::Uuid;

use crate::aggregate::AggregateError;
use crate::store::{EventStoreLockGuard, StoreEvent};
use crate::{Aggregate, SequenceNumber};

/// An [`AggregateError`] that occurred while folding a specific event, with the instance and
/// position it happened at attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to replay event at sequence {sequence_number} for aggregate {aggregate_id}: {source}")]
pub struct ReplayError {
    pub aggregate_id: Uuid,
    pub sequence_number: SequenceNumber,
    #[source]
    pub source: AggregateError,
}

/// Tracks an aggregate instance's identity, sequence number, and folded state across a
/// load/handle-command/persist cycle.
///
/// `AggregateState` does not buffer emitted events — [`crate::AggregateManager::handle_command`]
/// applies them as soon as the store accepts the write. Code building a longer-lived, "stage
/// several commands then commit" workflow should use [`AggregateRoot`] instead, which does buffer.
#[derive(Clone)]
pub struct AggregateState<S: Default + Clone> {
    id: Uuid,
    sequence_number: SequenceNumber,
    inner: S,
    lock: Option<std::sync::Arc<EventStoreLockGuard>>,
}

impl<S: Default + Clone> Default for AggregateState<S> {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_number: 0,
            inner: Default::default(),
            lock: None,
        }
    }
}

impl<S: Default + Clone> AggregateState<S> {
    /// Creates a brand-new instance, identified by a fresh random id, at sequence number 0.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            inner: Default::default(),
            sequence_number: 0,
            lock: None,
        }
    }

    /// Creates an instance for a known id without touching its sequence number or state —
    /// callers are expected to fold its history on afterward via [`AggregateState::apply_store_events`].
    pub fn with_id(id: Uuid) -> Self {
        Self::new(id)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this state, returning the folded inner value.
    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn set_inner(&mut self, s: S) -> &mut Self {
        self.inner = s;
        self
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub(crate) fn set_sequence_number(&mut self, sequence_number: SequenceNumber) -> &mut Self {
        self.sequence_number = sequence_number;
        self
    }

    pub(crate) fn incr_sequence_number(&mut self) -> &mut Self {
        self.sequence_number += 1;
        self
    }

    /// Attaches a lock acquired via [`crate::EventStore::lock`]; held for the lifetime of this
    /// value and released (unlocked) when it is dropped.
    pub fn set_lock(&mut self, lock: EventStoreLockGuard) -> &mut Self {
        self.lock = Some(std::sync::Arc::new(lock));
        self
    }

    /// Releases any attached lock early, returning it to the caller.
    pub fn take_lock(&mut self) -> Option<std::sync::Arc<EventStoreLockGuard>> {
        self.lock.take()
    }

    /// Folds a batch of previously-persisted events onto this state using `apply`, advancing the
    /// sequence number to match the last one applied. Used when reconstructing an instance from
    /// [`crate::EventStore::by_aggregate_id`].
    ///
    /// Stops and returns [`ReplayError`] at the first event `apply` rejects, with this instance's
    /// id and that event's sequence number attached.
    pub fn apply_store_events<A>(
        mut self,
        events: Vec<StoreEvent<A::Event>>,
        apply: impl Fn(S, A::Event) -> Result<S, AggregateError>,
    ) -> Result<Self, ReplayError>
    where
        A: Aggregate<State = S>,
    {
        for event in events {
            self.sequence_number = event.sequence_number;
            self.inner = apply(self.inner, event.payload).map_err(|source| ReplayError {
                aggregate_id: self.id,
                sequence_number: self.sequence_number,
                source,
            })?;
        }
        Ok(self)
    }
}

/// Aggregate root (C4): wraps [`AggregateState`] with an explicit buffer of events that have been
/// validated and applied locally but not yet appended to the store.
///
/// Where [`AggregateState`] plus [`crate::AggregateManager`] models "handle one command, persist
/// immediately," `AggregateRoot` models "apply zero or more changes, then commit them all
/// together" — the shape `spec.md`'s Aggregate Runtime component describes, and useful when a
/// caller wants to validate a sequence of commands against each other's effects before any of them
/// is durable.
pub struct AggregateRoot<A: Aggregate> {
    state: AggregateState<A::State>,
    uncommitted: Vec<A::Event>,
}

/// Either the domain rejected a command, or replaying/applying an event failed structurally.
#[derive(Debug, thiserror::Error)]
pub enum AggregateRootError<DomainError> {
    #[error(transparent)]
    Domain(DomainError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Starts a brand-new instance with no history.
    pub fn new(id: Uuid) -> Self {
        Self {
            state: AggregateState::new(id),
            uncommitted: Vec::new(),
        }
    }

    /// Reconstructs an instance by folding its full event history from scratch.
    pub fn load_from_history(id: Uuid, events: Vec<StoreEvent<A::Event>>) -> Result<Self, ReplayError> {
        let state = AggregateState::with_id(id).apply_store_events::<A>(events, A::apply_event)?;
        Ok(Self {
            state,
            uncommitted: Vec::new(),
        })
    }

    /// Reconstructs an instance from a snapshot's folded state plus the tail of events emitted
    /// since that snapshot was taken.
    pub fn load_from_snapshot(
        id: Uuid,
        snapshot_state: A::State,
        snapshot_version: SequenceNumber,
        tail: Vec<StoreEvent<A::Event>>,
    ) -> Result<Self, ReplayError> {
        let mut state = AggregateState::with_id(id);
        state.set_inner(snapshot_state);
        state.set_sequence_number(snapshot_version);
        let state = state.apply_store_events::<A>(tail, A::apply_event)?;
        Ok(Self {
            state,
            uncommitted: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.state.id()
    }

    /// The state as of the last applied event, including any uncommitted changes.
    pub fn state(&self) -> &A::State {
        self.state.inner()
    }

    /// The sequence number of the last applied event, including any uncommitted changes.
    pub fn version(&self) -> SequenceNumber {
        self.state.sequence_number()
    }

    /// The sequence number as of the last *committed* event — the `expected_version` a store
    /// append should be conditioned on.
    pub fn committed_version(&self) -> SequenceNumber {
        self.version() - self.uncommitted.len() as SequenceNumber
    }

    /// Events applied locally since the last [`AggregateRoot::mark_committed`], in the order they
    /// were applied.
    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Validates `command` against the current state, folds the resulting events onto it, and
    /// buffers them as uncommitted. Does not touch the store.
    pub fn handle_command(&mut self, command: A::Command) -> Result<(), AggregateRootError<A::Error>> {
        let events = A::handle_command(self.state.inner(), command).map_err(AggregateRootError::Domain)?;
        for event in events {
            self.apply_change(event)?;
        }
        Ok(())
    }

    /// Folds a single event onto the state and buffers it as uncommitted. Exposed directly for
    /// callers that already have validated events in hand (e.g. replaying a decision a policy made
    /// elsewhere).
    pub fn apply_change(&mut self, event: A::Event) -> Result<(), ReplayError> {
        let inner = self.state.inner().clone();
        let next_sequence = self.state.sequence_number() + 1;
        let new_inner = A::apply_event(inner, event.clone()).map_err(|source| ReplayError {
            aggregate_id: self.state.id(),
            sequence_number: next_sequence,
            source,
        })?;
        self.state.set_inner(new_inner);
        self.state.incr_sequence_number();
        self.uncommitted.push(event);
        Ok(())
    }

    /// Clears the uncommitted buffer after the caller has successfully appended it to the store.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }
}
