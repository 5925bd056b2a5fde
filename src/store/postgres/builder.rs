use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::{PgConnection, Pool, Postgres};
use tokio::sync::RwLock;

use crate::bus::EventBus;
use crate::handler::{EventHandler, TransactionalEventHandler};
use crate::sql::event::Persistable;
use crate::sql::migrations::{Migrations, MigrationsHandler};
use crate::sql::statements::{Statements, StatementsHandler};
use crate::store::postgres::{InnerPgStore, PgStoreError, PgStoreOutbox};
use crate::Aggregate;

use super::outbox::PgOutboxStore;
use super::{PgStore, Schema};

/// Retry budget staged outbox rows get when no override is set via
/// [`PgStoreBuilder::with_outbox_max_retries`].
const DEFAULT_OUTBOX_MAX_RETRIES: i32 = 10;

/// Builds a brand new [`PgStore`].
pub struct PgStoreBuilder<A, Schema = <A as Aggregate>::Event>
where
    A: Aggregate,
{
    pool: Pool<Postgres>,
    statements: Statements,
    event_handlers: Vec<Box<dyn EventHandler<A> + Send>>,
    transactional_event_handlers: Vec<Box<dyn TransactionalEventHandler<A, PgStoreError, PgConnection> + Send>>,
    event_buses: Vec<Box<dyn EventBus<A> + Send>>,
    outbox: Option<PgStoreOutbox>,
    run_migrations: bool,
    _schema: PhantomData<Schema>,
}

impl<A> PgStoreBuilder<A, <A as Aggregate>::Event>
where
    A: Aggregate,
{
    /// Creates a new instance of a [`PgStoreBuilder`].
    pub fn new(pool: Pool<Postgres>) -> PgStoreBuilder<A, <A as Aggregate>::Event> {
        PgStoreBuilder {
            pool,
            statements: Statements::new::<A>(),
            event_handlers: vec![],
            transactional_event_handlers: vec![],
            event_buses: vec![],
            outbox: None,
            run_migrations: true,
            _schema: PhantomData,
        }
    }
}

impl<A, S> PgStoreBuilder<A, S>
where
    A: Aggregate,
{
    /// Set event handlers list
    pub fn with_event_handlers(mut self, event_handlers: Vec<Box<dyn EventHandler<A> + Send>>) -> Self {
        self.event_handlers = event_handlers;
        self
    }

    /// Add a single event handler
    pub fn add_event_handler(mut self, event_handler: impl EventHandler<A> + Send + 'static) -> Self {
        self.event_handlers.push(Box::new(event_handler));
        self
    }

    /// Set transactional event handlers list
    pub fn with_transactional_event_handlers(
        mut self,
        transactional_event_handlers: Vec<Box<dyn TransactionalEventHandler<A, PgStoreError, PgConnection> + Send>>,
    ) -> Self {
        self.transactional_event_handlers = transactional_event_handlers;
        self
    }

    /// Add a single transactional event handler
    pub fn add_transactional_event_handler(
        mut self,
        transaction_event_handler: impl TransactionalEventHandler<A, PgStoreError, PgConnection> + Send + 'static,
    ) -> Self {
        self.transactional_event_handlers
            .push(Box::new(transaction_event_handler));
        self
    }

    /// Set event buses list
    pub fn with_event_buses(mut self, event_buses: Vec<Box<dyn EventBus<A> + Send>>) -> Self {
        self.event_buses = event_buses;
        self
    }

    /// Add a single event bus
    pub fn add_event_bus(mut self, event_bus: impl EventBus<A> + Send + 'static) -> Self {
        self.event_buses.push(Box::new(event_bus));
        self
    }

    /// Stages every persisted event into `outbox` as part of the same write transaction, bound
    /// for `destination`. Without this, events never reach the outbox and `PgStore::persist` is
    /// best-effort delivery only (whatever [`EventBus`]es are registered, published after commit).
    pub fn with_outbox(mut self, outbox: PgOutboxStore, destination: impl Into<String>) -> Self {
        self.outbox = Some(PgStoreOutbox {
            store: outbox,
            destination: destination.into(),
            max_retries: DEFAULT_OUTBOX_MAX_RETRIES,
        });
        self
    }

    /// Overrides the retry budget given to outbox rows staged by this store. Only meaningful once
    /// [`PgStoreBuilder::with_outbox`] has set an outbox.
    pub fn with_outbox_max_retries(mut self, max_retries: i32) -> Self {
        if let Some(outbox) = &mut self.outbox {
            outbox.max_retries = max_retries;
        }
        self
    }

    /// Calling this function the caller avoids running migrations. It is recommended to run
    /// migrations at least once per process at startup.
    pub fn without_running_migrations(mut self) -> Self {
        self.run_migrations = false;
        self
    }

    /// Sets the schema of the underlying [`PgStore`].
    pub fn with_schema<N>(self) -> PgStoreBuilder<A, N>
    where
        N: Schema<A::Event> + Persistable + Send + Sync,
    {
        PgStoreBuilder {
            pool: self.pool,
            statements: self.statements,
            run_migrations: self.run_migrations,
            event_handlers: self.event_handlers,
            transactional_event_handlers: self.transactional_event_handlers,
            event_buses: self.event_buses,
            outbox: self.outbox,
            _schema: PhantomData,
        }
    }

    /// Runs [`Migrations`] (atomically setting up the shared schema), unless
    /// [`PgStoreBuilder::without_running_migrations`] was called, then returns the built
    /// [`PgStore`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if running migrations fails.
    pub async fn try_build(self) -> Result<PgStore<A, S>, sqlx::Error> {
        if self.run_migrations {
            Migrations::run(&self.pool).await?;
        }

        Ok(PgStore {
            inner: Arc::new(InnerPgStore {
                pool: self.pool,
                statements: self.statements,
                event_handlers: RwLock::new(self.event_handlers),
                transactional_event_handlers: self.transactional_event_handlers,
                event_buses: self.event_buses,
                outbox: self.outbox,
            }),
            _schema: self._schema,
        })
    }
}
