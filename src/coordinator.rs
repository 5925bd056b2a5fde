//! The transaction coordinator (C6): the declarative `with_transaction(policy, fn)` boundary that
//! orchestrates load → execute → append → commit, retrying on optimistic-concurrency conflicts.
//!
//! Grounded on the teacher's `AggregateManager` (kept as the inner primitive this wraps) — the
//! teacher has no retry loop at all; this crate adds one per spec §4.6, using the same
//! `tracing`-instrumented, `thiserror`-based idiom as the rest of the storage layer.

use std::time::Duration;

use uuid::Uuid;

use crate::manager::{AggregateManager, ManagerError};
use crate::store::EventStore;
use crate::{Aggregate, AggregateState};

/// Isolation level requested for a coordinated transaction. Advisory for backends (like plain
/// Postgres `READ COMMITTED`) that don't expose every level; the Postgres store's optimistic
/// concurrency check makes `Serializable` the practical default regardless of the requested level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    ReadCommitted,
    Serializable,
}

/// Propagation semantics for a coordinated transaction relative to an ambient one, mirroring the
/// standard set (Spring's `@Transactional`, JTA, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    #[default]
    Required,
    RequiresNew,
    Mandatory,
    Never,
    Supports,
    NotSupported,
}

/// The declarative policy passed to [`TransactionCoordinator::with_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct TransactionPolicy {
    pub isolation: Isolation,
    pub propagation: Propagation,
    pub timeout: Duration,
    pub read_only: bool,
    pub retry_on_concurrency_conflict: bool,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            isolation: Isolation::ReadCommitted,
            propagation: Propagation::Required,
            timeout: Duration::from_secs(30),
            read_only: false,
            retry_on_concurrency_conflict: true,
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl TransactionPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.saturating_mul(1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError<E> {
    #[error("retries exhausted after {attempts} attempts on aggregate {aggregate_id}")]
    RetriesExhausted { aggregate_id: Uuid, attempts: u32 },
    #[error(transparent)]
    Store(E),
}

/// A command together with the identity of the aggregate instance it targets, loaded fresh on
/// every retry attempt.
pub trait TransactionalCommand<A: Aggregate>: Clone {
    fn aggregate_id(&self) -> Uuid;
    fn into_command(self) -> A::Command;
}

/// Wraps an [`AggregateManager`] with the retry-on-conflict loop spec §4.6 requires: on
/// [`crate::store::EventStore::persist`] reporting a concurrency conflict, the aggregate is
/// reloaded and the command re-executed, up to `policy.max_retries` times with exponential delay.
pub struct TransactionCoordinator<E>
where
    E: EventStore,
{
    manager: AggregateManager<E>,
}

impl<E> TransactionCoordinator<E>
where
    E: EventStore,
{
    pub fn new(event_store: E) -> Self {
        Self {
            manager: AggregateManager::new(event_store),
        }
    }

    pub fn manager(&self) -> &AggregateManager<E> {
        &self.manager
    }
}

impl<E> TransactionCoordinator<E>
where
    E: EventStore,
    E::Error: ConcurrencyConflictError,
{
    /// Runs `command` under `policy`, retrying on concurrency conflict by reloading the aggregate
    /// and re-invoking `handle_command`. A [`Propagation::Never`] or [`Propagation::NotSupported`]
    /// policy still runs the command (this runtime has no ambient transaction to detect), since
    /// those variants only matter when composed under an outer `with_transaction` call the caller
    /// controls.
    #[tracing::instrument(skip_all, fields(aggregate_id = %aggregate_id, isolation = ?policy.isolation, propagation = ?policy.propagation))]
    pub async fn with_transaction(
        &self,
        aggregate_id: Uuid,
        policy: TransactionPolicy,
        command: <E::Aggregate as Aggregate>::Command,
    ) -> Result<Result<<E::Aggregate as Aggregate>::State, <E::Aggregate as Aggregate>::Error>, CoordinatorError<ManagerError<E::Error>>>
    where
        <E::Aggregate as Aggregate>::Command: Clone,
    {
        let mut attempt = 0u32;

        loop {
            let aggregate_state = self
                .manager
                .load(aggregate_id)
                .await
                .map_err(CoordinatorError::Store)?
                .unwrap_or_else(|| AggregateState::with_id(aggregate_id));

            let result = tokio::time::timeout(
                policy.timeout,
                self.manager.handle_command(aggregate_state, command.clone()),
            )
            .await;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    tracing::warn!(aggregate_id = %aggregate_id, "transaction timed out");
                    attempt += 1;
                    if attempt >= policy.max_retries {
                        return Err(CoordinatorError::RetriesExhausted { aggregate_id, attempts: attempt });
                    }
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    continue;
                }
            };

            match outcome {
                Ok(domain_result) => return Ok(domain_result),
                Err(store_error) if policy.retry_on_concurrency_conflict && store_error.is_concurrency_conflict() => {
                    attempt += 1;
                    if attempt >= policy.max_retries {
                        return Err(CoordinatorError::RetriesExhausted { aggregate_id, attempts: attempt });
                    }
                    tracing::info!(aggregate_id = %aggregate_id, attempt, "concurrency conflict, retrying");
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                Err(store_error) => return Err(CoordinatorError::Store(store_error)),
            }
        }
    }
}

/// Lets the coordinator recognize a concurrency conflict without depending on a concrete store
/// error type; implemented by [`crate::store::postgres::PgStoreError`].
pub trait ConcurrencyConflictError {
    fn is_concurrency_conflict(&self) -> bool;
}

#[cfg(feature = "postgres")]
impl ConcurrencyConflictError for crate::store::postgres::PgStoreError {
    fn is_concurrency_conflict(&self) -> bool {
        matches!(self, crate::store::postgres::PgStoreError::ConcurrencyConflict { .. })
    }
}
