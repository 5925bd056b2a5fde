//! The transactional outbox (C5): staged rows written in the same transaction as an event append,
//! later claimed and delivered at-least-once by a background [`OutboxDispatcher`].
//!
//! Grounded on the `transactional-outbox` sibling example's `OutboxEvent`/`OutboxProcessor` shape
//! (claim a batch, publish, mark delivered or retry with backoff), adapted to this crate's
//! `tracing`-instrumented, `thiserror`-based idiom instead of `anyhow`.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Lifecycle of a staged outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    /// Claimed by a dispatcher instance and not yet acknowledged; a row in this state is not
    /// eligible to be claimed again, which is what keeps two dispatcher instances from delivering
    /// it twice while the first delivery is still in flight.
    Processing,
    Delivered,
    /// Exhausted its retry budget; held for operator inspection, never retried automatically.
    Poisoned,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Poisoned => "poisoned",
        }
    }
}

/// Everything needed to stage one message for delivery.
#[derive(Debug, Clone)]
pub struct OutboxMessage {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub destination: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    /// Lower values are claimed first. Defaults to `0`.
    pub priority: i32,
    /// Rows sharing a `partition_key` are delivered one at a time, in `created_at` order; `None`
    /// means this row has no ordering relationship with any other.
    pub partition_key: Option<String>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    /// Per-row retry budget before the row is poisoned.
    pub max_retries: i32,
}

/// A single staged message awaiting delivery.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: Uuid,
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub destination: String,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub priority: i32,
    pub partition_key: Option<String>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
}

/// Errors raised by an [`OutboxStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error(transparent)]
    Storage(Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// The staging table side of the outbox: appending and claiming rows. Appending happens inside the
/// same transaction as an event write (so failures roll back together); claiming happens from a
/// separate dispatcher loop against rows already committed.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Executor<'c>: Send;
    type Error: std::error::Error;

    /// Stages a message for delivery, in the caller's transaction.
    async fn stage<'c>(&self, executor: &mut Self::Executor<'c>, message: OutboxMessage) -> Result<(), Self::Error>;

    /// Claims up to `batch_size` pending rows for exclusive processing, transitioning them to
    /// [`OutboxStatus::Processing`] in the same claiming statement (e.g. via an `UPDATE ... WHERE
    /// id IN (SELECT ... FOR UPDATE SKIP LOCKED)`), so multiple dispatcher instances can run
    /// concurrently without double-delivering the same row: once a row leaves `pending` no other
    /// claim can select it until this dispatcher acks it back to `delivered`/`pending`/`poisoned`.
    async fn claim_batch(&self, batch_size: i64) -> Result<Vec<OutboxRow>, Self::Error>;

    /// Marks a row delivered.
    async fn mark_delivered(&self, id: Uuid) -> Result<(), Self::Error>;

    /// Records a failed delivery attempt, incrementing `attempts` and recording `error`, and
    /// returning the row to [`OutboxStatus::Pending`] for a later retry; becomes
    /// [`OutboxStatus::Poisoned`] once `attempts` reaches the row's own `max_retries`.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), Self::Error>;

    /// Deletes delivered rows older than is useful to keep around, bounding table growth.
    async fn gc_delivered(&self, older_than: chrono::Duration) -> Result<u64, Self::Error>;
}

/// Delivers a staged message to its destination (a message broker, webhook, etc).
#[async_trait]
pub trait Publisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, destination: &str, payload: &serde_json::Value) -> Result<(), Self::Error>;
}

/// Exponential backoff schedule for retrying a failed delivery. The retry budget itself lives on
/// each [`OutboxRow`]'s `max_retries`, set when the message was staged, since different messages
/// can carry different budgets; this policy only governs the delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// The delay before the `attempt`-th retry (1-indexed), doubling each time up to `max`.
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let attempt = attempt.max(1) as u32;
        let scaled = self.base.saturating_mul(1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX));
        scaled.min(self.max)
    }
}

/// Drives the claim/publish/ack loop against an [`OutboxStore`] and a [`Publisher`], polling on
/// `poll_interval` for new work.
pub struct OutboxDispatcher<S, P> {
    store: S,
    publisher: P,
    batch_size: i64,
    poll_interval: Duration,
    backoff: BackoffPolicy,
}

impl<S, P> OutboxDispatcher<S, P>
where
    S: OutboxStore,
    P: Publisher,
{
    pub fn new(store: S, publisher: P, batch_size: i64, poll_interval: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            publisher,
            batch_size,
            poll_interval,
            backoff,
        }
    }

    /// Claims and delivers one batch, returning the number of rows successfully delivered. Callers
    /// typically loop this with [`OutboxDispatcher::poll_interval`] between iterations, or drive it
    /// from a `tokio::time::interval`.
    #[tracing::instrument(skip_all)]
    pub async fn dispatch_once(&self) -> Result<usize, S::Error> {
        let batch = self.store.claim_batch(self.batch_size).await?;
        let mut delivered = 0usize;

        for row in batch {
            match self.publisher.publish(&row.destination, &row.payload).await {
                Ok(()) => {
                    self.store.mark_delivered(row.id).await?;
                    delivered += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        outbox_id = %row.id,
                        event_id = %row.event_id,
                        attempts = row.attempts,
                        error = %error,
                        "outbox delivery failed, will retry with backoff"
                    );
                    self.store.mark_failed(row.id, &error.to_string()).await?;
                }
            }
        }

        Ok(delivered)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    proptest::proptest! {
        /// Backoff never decreases with more attempts and never exceeds `max`, for any base/max
        /// the caller configures.
        #[test]
        fn backoff_is_monotonic_and_bounded(
            base_ms in 1u64..10_000,
            max_ms in 10_000u64..120_000,
            attempt in 1i32..50,
        ) {
            let policy = BackoffPolicy {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            };

            let this = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);

            proptest::prop_assert!(this <= policy.max);
            proptest::prop_assert!(next >= this);
        }
    }
}
