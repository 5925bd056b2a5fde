//! The upcaster registry (C8): an ordered chain of schema transformations
//! applied on read so older rows can be served as the current shape without
//! rewriting the log.

use crate::event::CodecError;

/// Default bound on chain length, preventing a misconfigured or cyclic set
/// of upcasters from looping forever.
pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 10;

/// A single step in an upcast chain: "if this row's `(event_type,
/// event_version)` matches, transform its payload and declare the version it
/// produced."
///
/// Implementations must be deterministic and side-effect-free — the engine
/// may apply the same upcaster to the same row more than once (e.g. across
/// projection restarts) and must always get the same result.
pub trait EventUpcaster: Send + Sync {
    /// Whether this upcaster applies to a row with this `event_type` currently
    /// at `event_version`.
    fn can_upcast(&self, event_type: &str, event_version: i32) -> bool;

    /// Transforms the payload, returning the new payload and the version it
    /// now represents.
    fn upcast(&self, payload: serde_json::Value) -> Result<serde_json::Value, serde_json::Error>;

    /// The version this upcaster's output represents.
    fn target_version(&self) -> i32;

    /// Among upcasters that both declare `can_upcast`, the one with the
    /// higher priority runs first. Defaults to 0.
    fn priority(&self) -> i32 {
        0
    }
}

/// Ordered set of [`EventUpcaster`]s, applied in priority order until none
/// declare they can act or the chain length bound is hit.
pub struct UpcasterRegistry {
    upcasters: Vec<Box<dyn EventUpcaster>>,
    strict_mode: bool,
    max_chain_length: usize,
}

impl Default for UpcasterRegistry {
    fn default() -> Self {
        Self {
            upcasters: Vec::new(),
            strict_mode: false,
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
        }
    }
}

impl UpcasterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// In strict mode, a row whose `event_version` no upcaster claims to act
    /// on is a fatal [`CodecError::UnknownEventType`]-style error instead of
    /// being passed through unchanged.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = max;
        self
    }

    pub fn register(mut self, upcaster: impl EventUpcaster + 'static) -> Self {
        self.upcasters.push(Box::new(upcaster));
        self
    }

    /// Applies the chain to a stored row, returning the (possibly
    /// transformed) payload and the version it now represents.
    pub fn apply(
        &self,
        event_type: &str,
        event_version: i32,
        mut payload: serde_json::Value,
    ) -> Result<(serde_json::Value, i32), CodecError> {
        let mut version = event_version;
        let mut steps = 0usize;

        loop {
            let mut candidates: Vec<&Box<dyn EventUpcaster>> = self
                .upcasters
                .iter()
                .filter(|u| u.can_upcast(event_type, version))
                .collect();

            if candidates.is_empty() {
                if self.strict_mode && steps == 0 {
                    return Err(CodecError::UnknownEventType(format!("{event_type}@{version}")));
                }
                break;
            }

            if steps >= self.max_chain_length {
                return Err(CodecError::SchemaMismatch {
                    event_type: event_type.to_string(),
                    source: serde::de::Error::custom(format!(
                        "upcaster chain exceeded max length {}",
                        self.max_chain_length
                    )),
                });
            }

            candidates.sort_by_key(|u| std::cmp::Reverse(u.priority()));
            let chosen = candidates[0];

            payload = chosen
                .upcast(payload)
                .map_err(|source| CodecError::SchemaMismatch {
                    event_type: event_type.to_string(),
                    source,
                })?;
            version = chosen.target_version();
            steps += 1;
        }

        Ok((payload, version))
    }
}

use serde::de::Error as _;
