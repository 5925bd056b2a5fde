//! The projection engine (C7): for each named projection, maintains a durable cursor over
//! [`crate::store::EventLog`], pulls events past the cursor in ordered batches, invokes the
//! projection's handler, and advances the cursor atomically with the handler's side-effects.
//!
//! Grounded on `jonathanbelolo-composable-rust`'s `core/src/projection.rs` for the `Projection`
//! trait / checkpoint shape, adapted to this crate's `global_sequence`-ordered catch-up loop and
//! `tracing`-instrumented retry idiom.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::EventEnvelope;
use crate::GlobalSequence;

/// A named, resumable consumer of the event log that folds events into a read model.
///
/// `handle_event` is expected to be idempotent: at-least-once delivery across restarts means a
/// handler may see the same event again if the process crashes after committing the read model
/// but before advancing the cursor persisted by a [`ProjectionCursorStore`].
#[async_trait]
pub trait Projection: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Unique projection name, used as the cursor's primary key.
    fn name(&self) -> &str;

    /// Applies one event to the read model. Implementations that need transactional atomicity
    /// with the cursor advance should use a [`ProjectionCursorStore`] backed by the same database
    /// as their read model, and commit both in one transaction from the driving runner.
    async fn handle_event(&self, event: &EventEnvelope) -> Result<(), Self::Error>;

    /// Clears the read model. Called by [`ProjectionRunner::reset`] alongside resetting the
    /// cursor to 0, to support full rebuilds.
    async fn reset(&self) -> Result<(), Self::Error>;
}

/// Durable, per-projection cursor storage.
#[async_trait]
pub trait ProjectionCursorStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load_cursor(&self, projection_name: &str) -> Result<GlobalSequence, Self::Error>;

    /// Advances the cursor to `position`, recording `status` alongside it so health checks can
    /// distinguish a caught-up projection from a halted one without a separate table.
    async fn advance_cursor(&self, projection_name: &str, position: GlobalSequence, status: ProjectionStatus) -> Result<(), Self::Error>;

    async fn reset_cursor(&self, projection_name: &str) -> Result<(), Self::Error>;

    async fn last_updated(&self, projection_name: &str) -> Result<Option<DateTime<Utc>>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStatus {
    Running,
    /// Exhausted its retry budget on some event; the runner will not advance past it
    /// automatically.
    Halted,
}

impl ProjectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionStatus::Running => "running",
            ProjectionStatus::Halted => "halted",
        }
    }
}

/// A projection's catch-up progress relative to the log's current head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionHealth {
    pub current_position: GlobalSequence,
    pub lag: GlobalSequence,
    pub healthy: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ProjectionHealth {
    /// `completion_ratio` is `current_position / head_sequence`, saturating at `1.0` when the log
    /// is empty (a projection with nothing to catch up to is fully caught up).
    pub fn completion_ratio(&self, head_sequence: GlobalSequence) -> f64 {
        if head_sequence <= 0 {
            1.0
        } else {
            (self.current_position as f64 / head_sequence as f64).min(1.0)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("projection {name} halted after exhausting retries on event {event_id}: {source}")]
    Halted {
        name: String,
        event_id: uuid::Uuid,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    CursorStore(Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    EventLog(Box<dyn std::error::Error + Send + Sync>),
}

/// Backoff/retry knobs for a single failing event before the projection halts.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionRetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ProjectionRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ProjectionRetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// Drives a [`Projection`]'s catch-up loop: read cursor, fetch a batch past it in
/// `global_sequence` order, invoke the handler per event with retry, advance the cursor.
pub struct ProjectionRunner<P, C> {
    projection: P,
    cursors: C,
    batch_size: i64,
    retry: ProjectionRetryPolicy,
    max_acceptable_lag: GlobalSequence,
}

impl<P, C> ProjectionRunner<P, C>
where
    P: Projection,
    C: ProjectionCursorStore,
{
    pub fn new(projection: P, cursors: C, batch_size: i64, retry: ProjectionRetryPolicy, max_acceptable_lag: GlobalSequence) -> Self {
        Self {
            projection,
            cursors,
            batch_size,
            retry,
            max_acceptable_lag,
        }
    }

    /// Runs one catch-up pass: fetches events past the cursor from `log` up to `batch_size`,
    /// applies them in order with retry, and advances the cursor after each successfully handled
    /// event. Returns the number of events processed.
    #[tracing::instrument(skip_all, fields(projection = self.projection.name()))]
    pub async fn catch_up_once<L>(&self, log: &L) -> Result<usize, ProjectionError>
    where
        L: crate::store::EventLog,
        L::Error: std::error::Error + Send + Sync + 'static,
    {
        use futures::StreamExt;

        let cursor = self
            .cursors
            .load_cursor(self.projection.name())
            .await
            .map_err(|error| ProjectionError::CursorStore(Box::new(error)))?;

        let mut stream = log.stream_all(cursor);
        let mut processed = 0usize;
        let mut position = cursor;

        while processed < self.batch_size as usize {
            let Some(next) = stream.next().await else { break };
            let event = next.map_err(|error| ProjectionError::EventLog(Box::new(error)))?;

            self.handle_with_retry(&event).await?;
            position = event.global_sequence;
            processed += 1;

            self.cursors
                .advance_cursor(self.projection.name(), position, ProjectionStatus::Running)
                .await
                .map_err(|error| ProjectionError::CursorStore(Box::new(error)))?;
        }

        Ok(processed)
    }

    async fn handle_with_retry(&self, event: &EventEnvelope) -> Result<(), ProjectionError> {
        let mut attempt = 0u32;
        loop {
            match self.projection.handle_event(event).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        projection = self.projection.name(),
                        event_id = %event.event_id,
                        attempt,
                        error = %source,
                        "projection handler failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(source) => {
                    let _ = self
                        .cursors
                        .advance_cursor(self.projection.name(), event.global_sequence - 1, ProjectionStatus::Halted)
                        .await;
                    return Err(ProjectionError::Halted {
                        name: self.projection.name().to_string(),
                        event_id: event.event_id,
                        source: Box::new(source),
                    });
                }
            }
        }
    }

    /// Resets the projection for a full rebuild: clears the read model, then zeroes the cursor.
    pub async fn reset(&self) -> Result<(), ProjectionError> {
        self.projection
            .reset()
            .await
            .map_err(|error| ProjectionError::CursorStore(Box::new(error)))?;
        self.cursors
            .reset_cursor(self.projection.name())
            .await
            .map_err(|error| ProjectionError::CursorStore(Box::new(error)))
    }

    /// Reports catch-up progress relative to `head_sequence` (the log's current global sequence).
    pub async fn health(&self, head_sequence: GlobalSequence) -> Result<ProjectionHealth, ProjectionError> {
        let current_position = self
            .cursors
            .load_cursor(self.projection.name())
            .await
            .map_err(|error| ProjectionError::CursorStore(Box::new(error)))?;
        let last_updated = self
            .cursors
            .last_updated(self.projection.name())
            .await
            .map_err(|error| ProjectionError::CursorStore(Box::new(error)))?;
        let lag = (head_sequence - current_position).max(0);

        Ok(ProjectionHealth {
            current_position,
            lag,
            healthy: lag <= self.max_acceptable_lag,
            last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_ratio_saturates_at_one() {
        let health = ProjectionHealth {
            current_position: 1000,
            lag: 0,
            healthy: true,
            last_updated: None,
        };
        assert_eq!(health.completion_ratio(1000), 1.0);
        assert_eq!(health.completion_ratio(0), 1.0);
        assert_eq!(health.completion_ratio(2000), 0.5);
    }

    struct FakeProjection;

    #[async_trait]
    impl Projection for FakeProjection {
        type Error = std::convert::Infallible;

        fn name(&self) -> &str {
            "fake"
        }

        async fn handle_event(&self, _event: &EventEnvelope) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn reset(&self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct FakeCursorStore {
        position: GlobalSequence,
    }

    #[async_trait]
    impl ProjectionCursorStore for FakeCursorStore {
        type Error = std::convert::Infallible;

        async fn load_cursor(&self, _projection_name: &str) -> Result<GlobalSequence, Self::Error> {
            Ok(self.position)
        }

        async fn advance_cursor(
            &self,
            _projection_name: &str,
            _position: GlobalSequence,
            _status: ProjectionStatus,
        ) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn reset_cursor(&self, _projection_name: &str) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn last_updated(&self, _projection_name: &str) -> Result<Option<DateTime<Utc>>, Self::Error> {
            Ok(None)
        }
    }

    fn runner(cursor_position: GlobalSequence, max_acceptable_lag: GlobalSequence) -> ProjectionRunner<FakeProjection, FakeCursorStore> {
        ProjectionRunner::new(
            FakeProjection,
            FakeCursorStore { position: cursor_position },
            100,
            ProjectionRetryPolicy::default(),
            max_acceptable_lag,
        )
    }

    #[tokio::test]
    async fn health_is_healthy_within_threshold() {
        let health = runner(950, 1000).health(1000).await.unwrap();
        assert_eq!(health.lag, 50);
        assert!(health.healthy);
    }

    #[tokio::test]
    async fn health_is_unhealthy_past_threshold() {
        let health = runner(0, 1000).health(1_000_000).await.unwrap();
        assert_eq!(health.lag, 1_000_000);
        assert!(!health.healthy);
    }
}
