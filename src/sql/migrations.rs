//! Schema management for the Postgres backend. Every aggregate type shares the same `events`
//! table (so the projection engine can observe one global order across all of them); snapshots,
//! the transactional outbox, and projection cursors each get their own table.

use async_trait::async_trait;
use sqlx::postgres::PgQueryResult;
use sqlx::{Database, Error, Pool, Postgres, Transaction};

/// Trait used to handle schema migrations, parametrized over the target database so a future
/// non-Postgres backend can provide its own DDL.
#[async_trait]
pub trait MigrationsHandler<D>
where
    D: Database,
{
    async fn run(pool: &Pool<D>) -> Result<(), Error>;
}

pub struct Migrations;

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events
(
    id              UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL,
    global_sequence BIGSERIAL NOT NULL,
    event_type      TEXT NOT NULL,
    event_version   INT NOT NULL DEFAULT 1,
    payload         JSONB NOT NULL,
    metadata        JSONB,
    occurred_on     TIMESTAMPTZ NOT NULL DEFAULT now(),
    checksum        TEXT NOT NULL,
    size_bytes      BIGINT NOT NULL
)
"#;

const CREATE_EVENTS_AGGREGATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS events_aggregate_id_idx ON events (aggregate_id, sequence_number)
"#;

const CREATE_EVENTS_GLOBAL_SEQUENCE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS events_global_sequence_idx ON events (global_sequence)
"#;

const CREATE_EVENTS_TYPE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS events_event_type_idx ON events (event_type)
"#;

const CREATE_EVENTS_UNIQUE_CONSTRAINT: &str = r#"
ALTER TABLE events
    DROP CONSTRAINT IF EXISTS events_aggregate_id_sequence_number_key,
    ADD CONSTRAINT events_aggregate_id_sequence_number_key UNIQUE (aggregate_id, sequence_number)
"#;

const CREATE_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots
(
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    sequence_number BIGINT NOT NULL,
    state           JSONB NOT NULL,
    taken_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (aggregate_id, sequence_number)
)
"#;

const CREATE_SNAPSHOTS_LATEST_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS snapshots_aggregate_id_sequence_number_idx
    ON snapshots (aggregate_id, sequence_number DESC)
"#;

const CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS event_outbox
(
    id              UUID PRIMARY KEY,
    event_id        UUID NOT NULL,
    aggregate_id    UUID NOT NULL,
    aggregate_type  TEXT NOT NULL,
    event_type      TEXT NOT NULL,
    destination     TEXT NOT NULL,
    payload         JSONB NOT NULL,
    metadata        JSONB,
    priority        INT NOT NULL DEFAULT 0,
    partition_key   TEXT,
    tenant_id       TEXT,
    correlation_id  UUID,
    status          TEXT NOT NULL DEFAULT 'pending',
    attempts        INT NOT NULL DEFAULT 0,
    max_retries     INT NOT NULL DEFAULT 10,
    last_error      TEXT,
    available_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    published_at    TIMESTAMPTZ
)
"#;

const CREATE_OUTBOX_CLAIM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS event_outbox_claim_idx ON event_outbox (status, priority, created_at)
"#;

const CREATE_OUTBOX_PARTITION_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS event_outbox_partition_key_idx ON event_outbox (partition_key, status) WHERE partition_key IS NOT NULL
"#;

const CREATE_PROJECTION_CURSORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS projection_cursors
(
    projection_name TEXT PRIMARY KEY,
    global_sequence BIGINT NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'running',
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

#[async_trait]
impl MigrationsHandler<Postgres> for Migrations {
    #[tracing::instrument(skip_all)]
    async fn run(pool: &Pool<Postgres>) -> Result<(), Error> {
        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        let migrations: [&str; 11] = [
            CREATE_EVENTS_TABLE,
            CREATE_EVENTS_AGGREGATE_INDEX,
            CREATE_EVENTS_GLOBAL_SEQUENCE_INDEX,
            CREATE_EVENTS_TYPE_INDEX,
            CREATE_EVENTS_UNIQUE_CONSTRAINT,
            CREATE_SNAPSHOTS_TABLE,
            CREATE_SNAPSHOTS_LATEST_INDEX,
            CREATE_OUTBOX_TABLE,
            CREATE_OUTBOX_CLAIM_INDEX,
            CREATE_OUTBOX_PARTITION_INDEX,
            CREATE_PROJECTION_CURSORS_TABLE,
        ];

        for migration in migrations {
            let _: PgQueryResult = sqlx::query(migration).execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}
