//! The event codec (C1): turns a domain event into the `(event_type,
//! event_version, payload, checksum)` tuple the log persists, and back.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Declares the static discriminator for a concrete event schema.
///
/// `EVENT_TYPE` is registered once per concrete type and must be unique among
/// every event type an application persists; duplicates are a programming
/// error and should be caught in tests, not at runtime. `EVENT_VERSION`
/// defaults to 1 and is bumped whenever the payload shape changes in a way
/// that isn't self-describing, which is also when an [`Upcaster`] is needed.
pub trait EventType {
    /// Short string identifying the concrete event schema, e.g. `"account.opened"`.
    const EVENT_TYPE: &'static str;

    /// Schema revision. Defaults to 1.
    const EVENT_VERSION: i32 = 1;
}

/// A pure transformation from an older event schema version to a newer one,
/// applied at read time so the log never has to be rewritten in place.
///
/// Implementors must be deterministic and side-effect-free: the same stored
/// row, upcast twice, must produce the same in-memory value.
pub trait Upcaster
where
    Self: Sized,
{
    /// Reconstructs `Self` from a stored JSON payload at the given schema
    /// version (`None` means "version 1, no version column recorded").
    ///
    /// The default implementation performs no transformation — suitable for
    /// event types that have never changed shape.
    fn upcast(value: serde_json::Value, _version: Option<i32>) -> Result<Self, serde_json::Error>
    where
        Self: DeserializeOwned,
    {
        serde_json::from_value(value)
    }

    /// The schema version this type upcasts *to*. `None` means versioning is
    /// not tracked for this event (always reads as the latest shape).
    fn current_version() -> Option<i32> {
        None
    }
}

/// Errors raised while decoding a stored row back into a domain event.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// No type is registered for the `event_type` discriminator found on the row.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    /// The decoder rejected the payload against the expected schema.
    #[error("payload does not match schema for event type {event_type}: {source}")]
    SchemaMismatch {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
    /// The checksum recomputed at read time does not match the one persisted
    /// at write time — the row was tampered with or corrupted in transit.
    #[error("checksum mismatch for event {event_id}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        event_id: uuid::Uuid,
        expected: String,
        actual: String,
    },
}

/// Computes and verifies the SHA-256 checksum over a canonically-serialized
/// event payload.
///
/// Canonicalization here means "the bytes `serde_json` emits for this value,
/// with no transformation" — `serde_json::Value`'s `Map` preserves insertion
/// order and does not run a stable key sort by default, so callers that need
/// byte-for-byte stability across re-serializations should build payloads
/// with `serde_json::Map` in a fixed field order (derived structs already do
/// this, since their field order matches declaration order).
pub struct Checksum;

impl Checksum {
    /// Computes the lowercase hex-encoded SHA-256 digest of a payload.
    pub fn compute(payload: &serde_json::Value) -> String {
        let bytes = serde_json::to_vec(payload).expect("serde_json::Value always serializes");
        let digest = Sha256::digest(&bytes);
        hex_lower(&digest)
    }

    /// Recomputes the checksum of `payload` and compares it against
    /// `expected`, returning [`CodecError::ChecksumMismatch`] on divergence.
    pub fn verify(event_id: uuid::Uuid, payload: &serde_json::Value, expected: &str) -> Result<(), CodecError> {
        let actual = Self::compute(payload);
        if actual == expected {
            Ok(())
        } else {
            Err(CodecError::ChecksumMismatch {
                event_id,
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

/// Marker bound shared by every event payload type that can round-trip
/// through the store: serializable, deserializable, and safe to move across
/// task boundaries.
pub trait Event: Serialize + DeserializeOwned + Clone + Send + Sync {}

impl<T> Event for T where T: Serialize + DeserializeOwned + Clone + Send + Sync {}
