use async_trait::async_trait;
use futures::StreamExt;
use sqlx::{PgConnection, Pool, Postgres, Transaction};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::handler::{ReplayableEventHandler, TransactionalEventHandler};
use crate::rebuilder::Rebuilder;
use crate::store::postgres::{PgStore, PgStoreBuilder, PgStoreError};
use crate::store::{EventStore, StoreEvent};
use crate::Aggregate;

pub struct PgRebuilder<A>
where
    A: Aggregate,
{
    event_handlers: Vec<Box<dyn ReplayableEventHandler<A> + Send>>,
    transactional_event_handlers: Vec<Box<dyn TransactionalEventHandler<A, PgStoreError, PgConnection> + Send>>,
    event_buses: Vec<Box<dyn EventBus<A> + Send>>,
}

impl<A> PgRebuilder<A>
where
    A: Aggregate,
{
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_event_handlers(self, event_handlers: Vec<Box<dyn ReplayableEventHandler<A> + Send>>) -> Self {
        Self { event_handlers, ..self }
    }

    pub fn with_transactional_event_handlers(
        self,
        transactional_event_handlers: Vec<Box<dyn TransactionalEventHandler<A, PgStoreError, PgConnection> + Send>>,
    ) -> Self {
        Self {
            transactional_event_handlers,
            ..self
        }
    }

    pub fn with_event_buses(self, event_buses: Vec<Box<dyn EventBus<A> + Send>>) -> Self {
        Self { event_buses, ..self }
    }

    async fn replay(&self, events: &[StoreEvent<A::Event>], aggregate_id: Uuid, transaction: &mut Transaction<'_, Postgres>) -> Result<(), PgStoreError> {
        for handler in self.transactional_event_handlers.iter() {
            handler.delete(aggregate_id, transaction).await?;

            for event in events {
                handler.handle(event, transaction).await?;
            }
        }

        Ok(())
    }

    async fn dispatch(&self, events: &[StoreEvent<A::Event>], aggregate_id: Uuid) {
        for handler in self.event_handlers.iter() {
            handler.delete(aggregate_id).await;

            for event in events {
                handler.handle(event).await;
            }
        }

        for bus in self.event_buses.iter() {
            for event in events {
                bus.publish(event).await;
            }
        }
    }
}

impl<A> Default for PgRebuilder<A>
where
    A: Aggregate,
{
    fn default() -> Self {
        Self {
            event_handlers: vec![],
            transactional_event_handlers: vec![],
            event_buses: vec![],
        }
    }
}

#[async_trait]
impl<A> Rebuilder<A> for PgRebuilder<A>
where
    A: Aggregate,
    A::Event: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
    A::State: Send,
{
    type Executor = Pool<Postgres>;
    type Error = PgStoreError;

    /// Deletes and replays every aggregate instance of this aggregate type one at a time, so a
    /// slow or failing handler for one instance doesn't block progress on the rest.
    async fn by_aggregate_id(&self, pool: Pool<Postgres>) -> Result<(), Self::Error> {
        let store: PgStore<A> = PgStoreBuilder::new(pool.clone())
            .without_running_migrations()
            .try_build()
            .await?;

        let aggregate_ids: Vec<Uuid> = get_aggregate_ids(&pool, store.aggregate_type()).await?;

        for id in aggregate_ids {
            self.just_one_aggregate(id, pool.clone()).await?;
        }

        Ok(())
    }

    /// Deletes and replays a single aggregate instance: every [`TransactionalEventHandler`] runs
    /// in one transaction alongside the delete, then every [`EventHandler`] and [`EventBus`] runs
    /// after commit.
    async fn just_one_aggregate(&self, aggregate_id: Uuid, pool: Pool<Postgres>) -> Result<(), Self::Error> {
        let store: PgStore<A> = PgStoreBuilder::new(pool.clone())
            .without_running_migrations()
            .try_build()
            .await?;

        let events = store.by_aggregate_id(aggregate_id).await?;

        let mut transaction: Transaction<Postgres> = pool.begin().await?;
        self.replay(&events, aggregate_id, &mut transaction).await?;
        transaction.commit().await?;

        self.dispatch(&events, aggregate_id).await;

        Ok(())
    }

    /// Deletes and replays every aggregate instance of this aggregate type in a single
    /// transaction, for the case where the read model rebuild must be all-or-nothing.
    async fn all_at_once(&self, pool: Pool<Postgres>) -> Result<(), Self::Error> {
        let store: PgStore<A> = PgStoreBuilder::new(pool.clone())
            .without_running_migrations()
            .try_build()
            .await?;

        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        let events: Vec<StoreEvent<A::Event>> = store
            .stream_events(&mut *transaction)
            .collect::<Vec<Result<StoreEvent<A::Event>, Self::Error>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<StoreEvent<A::Event>>, Self::Error>>()?;

        let mut by_aggregate: std::collections::HashMap<Uuid, Vec<StoreEvent<A::Event>>> = std::collections::HashMap::new();
        for event in events {
            by_aggregate.entry(event.aggregate_id).or_default().push(event);
        }

        for (aggregate_id, events) in &by_aggregate {
            self.replay(events, *aggregate_id, &mut transaction).await?;
        }

        transaction.commit().await?;

        for (aggregate_id, events) in &by_aggregate {
            self.dispatch(events, *aggregate_id).await;
        }

        Ok(())
    }
}

async fn get_aggregate_ids(pool: &Pool<Postgres>, aggregate_type: &str) -> Result<Vec<Uuid>, sqlx::Error> {
    let result: Vec<(Uuid,)> = sqlx::query_as::<_, (Uuid,)>("SELECT DISTINCT aggregate_id FROM events WHERE aggregate_type = $1")
        .bind(aggregate_type)
        .fetch_all(pool)
        .await?;
    Ok(result.into_iter().map(|(id,)| id).collect())
}
