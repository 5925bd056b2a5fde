use crate::sql::event::Persistable;

/// Decouples the in-memory [`crate::Aggregate::Event`] type from the row persisted in
/// [`super::PgStore`]'s backing table. Most aggregates never need a separate schema type — the
/// blanket impl below makes every [`Persistable`] its own `Schema` — but a service migrating an
/// event's Rust shape without bumping its `event_type`, or deprecating an old event entirely, can
/// supply its own `Schema<E>` that maps to/from the event type explicitly.
///
/// `write` must be total; `read` returns `None` to signal "this stored row no longer maps to a
/// live `E` variant," letting a deprecated event be skipped on load rather than erroring the whole
/// stream.
///
/// The round trip must hold for every non-deprecated event:
///
/// ```rust
/// # use serde::{Serialize, Deserialize};
/// # use escore::store::postgres::Schema as SchemaTrait;
/// #
/// # #[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
/// # struct Event {
/// #   a: u32,
/// # }
/// #
/// # let event = Event { a: 42 };
/// assert_eq!(Some(event.clone()), Schema::write(event).read());
/// ```
pub trait Schema<E>: Persistable {
    /// Converts the event into the schema type.
    fn write(event: E) -> Self;

    /// Converts the schema back into the event type, or `None` if this row represents a
    /// deprecated event that should be silently skipped.
    fn read(self) -> Option<E>;
}

impl<E> Schema<E> for E
where
    E: Persistable,
{
    fn write(event: E) -> Self {
        event
    }

    fn read(self) -> Option<E> {
        Some(self)
    }
}
