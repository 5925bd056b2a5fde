use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgAdvisoryLock, PgAdvisoryLockGuard, PgAdvisoryLockKey};
use sqlx::{Executor, PgConnection, Pool, Postgres, Transaction};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::event::{Checksum, Event, EventType};
use crate::handler::{EventHandler, TransactionalEventHandler};
use crate::outbox::{OutboxMessage, OutboxStore};
use crate::sql::event::DbEvent;
use crate::sql::statements::Statements;
use crate::store::postgres::{PgStoreError, PgStoreOutbox};
use crate::store::{EventStore, EventStoreLockGuard, StoreEvent, UnlockOnDrop};
use crate::{Aggregate, AggregateState, SequenceNumber};

use super::schema::Schema;

/// Default Postgres implementation of the per-aggregate-type [`EventStore`] facade.
///
/// The store is wrapped in an [`Arc`] so it is cheaply cloneable while every clone still shares the
/// same connection pool and handler registrations.
///
/// To decouple persistence from the event types, a store can optionally specify a `Schema` type
/// (see [`Schema`]). When events are persisted they are converted through `Schema::write` before
/// serialization; when they are read back they are decoded and converted through `Schema::read`,
/// which can return `None` to silently drop a deprecated event from the reconstructed stream.
pub struct PgStore<A, S = <A as Aggregate>::Event>
where
    A: Aggregate,
{
    pub(super) inner: Arc<InnerPgStore<A>>,
    pub(super) _schema: PhantomData<S>,
}

pub(super) struct InnerPgStore<A>
where
    A: Aggregate,
{
    pub(super) pool: Pool<Postgres>,
    pub(super) statements: Statements,
    pub(super) event_handlers: RwLock<Vec<Box<dyn EventHandler<A> + Send>>>,
    pub(super) transactional_event_handlers:
        Vec<Box<dyn TransactionalEventHandler<A, PgStoreError, PgConnection> + Send>>,
    pub(super) event_buses: Vec<Box<dyn EventBus<A> + Send>>,
    pub(super) outbox: Option<PgStoreOutbox>,
}

impl<A, S> PgStore<A, S>
where
    A: Aggregate,
    A::Event: Send + Sync,
    S: Schema<A::Event> + EventType + Event + Send + Sync,
{
    /// Returns the `aggregate_type` discriminator this store filters on.
    pub fn aggregate_type(&self) -> &'static str {
        self.inner.statements.aggregate_type()
    }

    /// Safely add an event handler to a running [`PgStore`]. Since it appends to a [`RwLock`] this
    /// is `async`; mostly useful for sagas that need to register a handler that issues further
    /// commands against the same aggregate.
    pub async fn add_event_handler(&self, event_handler: impl EventHandler<A> + Send + 'static) {
        let mut guard = self.inner.event_handlers.write().await;
        guard.push(Box::new(event_handler))
    }

    /// Persists a single event and returns the resulting [`StoreEvent`]. The checksum is computed
    /// over the schema-encoded payload; `sequence_number` becomes the row's `sequence_number` and,
    /// via the unique constraint on `(aggregate_id, sequence_number)`, the optimistic concurrency
    /// check.
    async fn save_event(
        &self,
        aggregate_id: Uuid,
        event: A::Event,
        metadata: Option<serde_json::Value>,
        sequence_number: SequenceNumber,
        executor: impl Executor<'_, Database = Postgres>,
    ) -> Result<StoreEvent<A::Event>, PgStoreError> {
        let id: Uuid = Uuid::new_v4();
        let occurred_on = Utc::now();
        let aggregate_type = self.aggregate_type();
        let schema = S::write(event);
        let payload = serde_json::to_value(&schema)?;
        let checksum = Checksum::compute(&payload);
        let size_bytes = serde_json::to_vec(&payload)?.len() as i64;

        let insert_result: Result<crate::GlobalSequence, sqlx::Error> = sqlx::query_scalar(self.inner.statements.insert())
            .bind(id)
            .bind(aggregate_id)
            .bind(aggregate_type)
            .bind(sequence_number)
            .bind(S::EVENT_TYPE)
            .bind(S::EVENT_VERSION)
            .bind(&payload)
            .bind(&metadata)
            .bind(occurred_on)
            .bind(&checksum)
            .bind(size_bytes)
            .fetch_one(executor)
            .await;

        let global_sequence: crate::GlobalSequence = match insert_result {
            Ok(global_sequence) => global_sequence,
            Err(error) if PgStoreError::is_concurrency_violation(&error) => {
                let actual: SequenceNumber = sqlx::query_scalar(self.inner.statements.get_version())
                    .bind(aggregate_id)
                    .bind(aggregate_type)
                    .fetch_one(&self.inner.pool)
                    .await?;
                return Err(PgStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: sequence_number - 1,
                    actual,
                });
            }
            Err(error) => return Err(PgStoreError::from(error)),
        };

        Ok(StoreEvent {
            id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            payload: schema.read().expect(
                "For any type that implements Schema the following contract should be upheld:\
                assert_eq!(Some(event.clone()), Schema::write(event).read())",
            ),
            metadata,
            occurred_on,
            sequence_number,
            global_sequence,
            version: Some(S::EVENT_VERSION),
        })
    }

    /// Streams the full event store content for this aggregate type. Mainly used by the offline
    /// rebuilder to regenerate a read model from scratch.
    pub fn stream_events<'s>(
        &'s self,
        executor: impl Executor<'s, Database = Postgres> + 's,
    ) -> BoxStream<'s, Result<StoreEvent<A::Event>, PgStoreError>> {
        let aggregate_type = self.aggregate_type();
        Box::pin({
            sqlx::query_as::<_, DbEvent>(self.inner.statements.select_all())
                .bind(aggregate_type)
                .fetch(executor)
                .map(|res| Ok(res?.try_into_store_event::<_, S>()?))
                .map(Result::transpose)
                .filter_map(std::future::ready)
        })
    }
}

/// Concrete implementation of [`EventStoreLockGuard`] for the [`PgStore`].
///
/// Holds both the [`PgAdvisoryLock`] and its child [`PgAdvisoryLockGuard`]. When dropped, the
/// guard is dropped first, releasing the advisory lock.
#[ouroboros::self_referencing]
pub struct PgStoreLockGuard {
    lock: PgAdvisoryLock,
    #[borrows(lock)]
    #[covariant]
    guard: PgAdvisoryLockGuard<'this, PoolConnection<Postgres>>,
}

impl UnlockOnDrop for PgStoreLockGuard {}

#[async_trait]
impl<A, S> EventStore for PgStore<A, S>
where
    A: Aggregate,
    A::State: Send,
    A::Event: Send + Sync,
    S: Schema<A::Event> + EventType + Event + Send + Sync,
{
    type Aggregate = A;
    type Error = PgStoreError;

    async fn lock(&self, aggregate_id: Uuid) -> Result<EventStoreLockGuard, Self::Error> {
        let (key, _) = aggregate_id.as_u64_pair();
        let connection = self.inner.pool.acquire().await?;
        let lock_guard = PgStoreLockGuardAsyncSendTryBuilder {
            lock: PgAdvisoryLock::with_key(PgAdvisoryLockKey::BigInt(key as i64)),
            guard_builder: |lock: &PgAdvisoryLock| Box::pin(async move { lock.acquire(connection).await }),
        }
        .try_build()
        .await?;
        Ok(EventStoreLockGuard::new(lock_guard))
    }

    async fn by_aggregate_id(&self, aggregate_id: Uuid) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        Ok(sqlx::query_as::<_, DbEvent>(self.inner.statements.by_aggregate_id())
            .bind(aggregate_id)
            .bind(self.aggregate_type())
            .fetch_all(&self.inner.pool)
            .await?
            .into_iter()
            .map(|event| Ok(event.try_into_store_event::<_, S>()?))
            .filter_map(Result::transpose)
            .collect::<Result<Vec<StoreEvent<A::Event>>, Self::Error>>()?)
    }

    async fn get_version(&self, aggregate_id: Uuid) -> Result<SequenceNumber, Self::Error> {
        let version: SequenceNumber = sqlx::query_scalar(self.inner.statements.get_version())
            .bind(aggregate_id)
            .bind(self.aggregate_type())
            .fetch_one(&self.inner.pool)
            .await?;
        Ok(version)
    }

    // Note: https://github.com/rust-lang/rust-clippy/issues/12281
    #[allow(clippy::blocks_in_conditions)]
    #[tracing::instrument(skip_all, fields(aggregate_id = % aggregate_state.id()), err)]
    async fn persist(
        &self,
        aggregate_state: &mut AggregateState<A::State>,
        events: Vec<A::Event>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        let mut transaction: Transaction<Postgres> = self.inner.pool.begin().await?;
        let mut store_events: Vec<StoreEvent<A::Event>> = vec![];

        let aggregate_id = aggregate_state.id();

        for event in events.into_iter() {
            aggregate_state.incr_sequence_number();
            let store_event: StoreEvent<A::Event> = self
                .save_event(
                    aggregate_id,
                    event,
                    metadata.clone(),
                    aggregate_state.sequence_number(),
                    &mut *transaction,
                )
                .await?;

            store_events.push(store_event);
        }

        if let Some(outbox) = &self.inner.outbox {
            for store_event in &store_events {
                let payload = serde_json::to_value(&store_event.payload)?;
                let message = OutboxMessage {
                    event_id: store_event.id,
                    aggregate_id: store_event.aggregate_id,
                    aggregate_type: store_event.aggregate_type.clone(),
                    event_type: S::EVENT_TYPE.to_string(),
                    destination: outbox.destination.clone(),
                    payload,
                    metadata: store_event.metadata.clone(),
                    priority: 0,
                    // Rows for the same aggregate share a partition key so the outbox never
                    // delivers them out of the order they were appended in.
                    partition_key: Some(store_event.aggregate_id.to_string()),
                    tenant_id: None,
                    correlation_id: None,
                    max_retries: outbox.max_retries,
                };

                outbox
                    .store
                    .stage(&mut transaction, message)
                    .await
                    .map_err(|error| PgStoreError::Custom(Box::new(error)))?;
            }
        }

        for store_event in &store_events {
            for transactional_event_handler in &self.inner.transactional_event_handlers {
                let span = tracing::trace_span!(
                    "escore.transactional_event_handler",
                    event_id = %store_event.id,
                    aggregate_id = %store_event.aggregate_id,
                    transactional_event_handler = transactional_event_handler.name()
                );
                let _e = span.enter();

                if let Err(error) = transactional_event_handler.handle(store_event, &mut transaction).await {
                    tracing::error!({
                        event_id = %store_event.id,
                        aggregate_id = %store_event.aggregate_id,
                        transactional_event_handler = transactional_event_handler.name(),
                        error = ?error,
                    }, "transactional event handler failed to handle event");

                    return Err(error);
                }
            }
        }

        transaction.commit().await?;

        // Drop the lock (if any) now that the events are durable: event handlers below might need
        // to access this aggregate atomically, which would deadlock if we still held it.
        drop(aggregate_state.take_lock());

        let event_handlers = self.inner.event_handlers.read().await;
        for store_event in &store_events {
            for event_handler in event_handlers.iter() {
                let span = tracing::debug_span!(
                    "escore.event_handler",
                    event_id = %store_event.id,
                    aggregate_id = %store_event.aggregate_id,
                    event_handler = event_handler.name()
                );
                let _e = span.enter();

                event_handler.handle(store_event).await;
            }
        }

        self.publish(&store_events).await;

        Ok(store_events)
    }

    async fn publish(&self, store_events: &[StoreEvent<A::Event>]) {
        let futures: Vec<_> = self
            .inner
            .event_buses
            .iter()
            .map(|bus| async move {
                for store_event in store_events {
                    bus.publish(store_event).await;
                }
            })
            .collect();

        let _ = futures::future::join_all(futures).await;
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), Self::Error> {
        let mut transaction: Transaction<Postgres> = self.inner.pool.begin().await?;

        let _ = sqlx::query(self.inner.statements.delete_by_aggregate_id())
            .bind(aggregate_id)
            .bind(self.aggregate_type())
            .execute(&mut *transaction)
            .await
            .map(|_| ())?;

        for transactional_event_handler in self.inner.transactional_event_handlers.iter() {
            transactional_event_handler
                .delete(aggregate_id, &mut transaction)
                .await?;
        }

        transaction.commit().await?;

        let event_handlers = self.inner.event_handlers.read().await;
        for event_handler in event_handlers.iter() {
            event_handler.delete(aggregate_id).await;
        }

        Ok(())
    }
}

impl<A: Aggregate> std::fmt::Debug for PgStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("statements", &self.inner.statements)
            .finish()
    }
}

impl<A, S> Clone for PgStore<A, S>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _schema: PhantomData,
        }
    }
}
