/// Error surfaced by [`Aggregate::apply_event`] when an event payload doesn't match any handler
/// this aggregate type recognizes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregateError {
    #[error("no handler registered for event type {event_type}")]
    HandlerNotFound { event_type: String },
}

/// The Aggregate trait is responsible for validating commands, mapping commands to events, and
/// applying events onto the state.
///
/// An Aggregate should be able to derive its own state from nothing but its initial configuration
/// and its event stream. Applying the same events, in the same order, to the same aggregate should
/// always yield an identical aggregate state.
///
/// This trait is purposefully _synchronous_ and side-effect-free: `apply_event` is replayed during
/// reconstruction (from full history, or from a snapshot plus tail), and a state-update function
/// that reads the clock or does I/O would produce a different state on replay than it did live.
/// `handle_command` validates and performs any I/O it needs *before* producing events; once emitted,
/// events are facts and `apply_event` is not allowed to reject them.
pub trait Aggregate {
    /// Uniquely names this aggregate type. Used to link aggregate instances and their events in the
    /// store; changing it breaks that link for every existing instance.
    const NAME: &'static str;

    /// Internal aggregate state, wrapped in [`crate::AggregateState`].
    type State: Default + Clone + Send + Sync;

    /// An action the caller can execute over an aggregate instance in order to have it emit events.
    type Command: Send;

    /// A fact that took place in the domain. The source of truth; state is derived from events, never
    /// the other way around.
    type Event: crate::event::Event;

    /// Domain errors raised while validating a command. Never a technical/storage error — those
    /// surface through the store's own error type instead.
    type Error: std::error::Error;

    /// Validates a command against the current state and, if accepted, returns the events it
    /// produces. Returning `Ok(events)` does not persist anything by itself — the caller (typically
    /// [`crate::AggregateManager`] or [`crate::coordinator::TransactionCoordinator`]) is responsible
    /// for appending the returned events and applying them back onto the state.
    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Updates the aggregate state by applying a single event. Assumes the event can be legally
    /// applied; if that invariant is ever broken (e.g. a missing handler for a concrete event
    /// variant), implementations should return [`AggregateError::HandlerNotFound`] rather than
    /// silently dropping the event or panicking — the caller folding a stream of events (replay,
    /// `AggregateManager`, `AggregateRoot`) reports it with the aggregate instance and sequence
    /// number attached, instead of the whole task aborting.
    fn apply_event(state: Self::State, event: Self::Event) -> Result<Self::State, AggregateError>;
}
