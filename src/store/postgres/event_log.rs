//! Type-erased, cross-aggregate-type reader over the shared `events` table — the [`EventLog`]
//! half of C2, consumed by the projection engine (C7) and the offline rebuilder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{Pool, Postgres};

use crate::store::{EventEnvelope, EventLog, EventLogStats, MetadataCriteria};
use crate::GlobalSequence;

const CURRENT_GLOBAL_SEQUENCE: &str = "SELECT COALESCE(MAX(global_sequence), 0) FROM events";

const STREAM_ALL: &str = "SELECT * FROM events WHERE global_sequence > $1 ORDER BY global_sequence ASC";

const STREAM_BY_EVENT_TYPES: &str =
    "SELECT * FROM events WHERE global_sequence > $1 AND event_type = ANY($2) ORDER BY global_sequence ASC";

const STREAM_BY_AGGREGATE_TYPES: &str =
    "SELECT * FROM events WHERE global_sequence > $1 AND aggregate_type = ANY($2) ORDER BY global_sequence ASC";

const STREAM_BY_TIME_RANGE: &str =
    "SELECT * FROM events WHERE occurred_on BETWEEN $1 AND $2 ORDER BY global_sequence ASC";

const STREAM_BY_METADATA: &str =
    "SELECT * FROM events WHERE global_sequence > $1 AND metadata @> $2 ORDER BY global_sequence ASC";

const STATS_BY_AGGREGATE_TYPE: &str = "SELECT aggregate_type, COUNT(*) FROM events GROUP BY aggregate_type";
const STATS_BY_EVENT_TYPE: &str = "SELECT event_type, COUNT(*) FROM events GROUP BY event_type";
const STATS_TOTAL: &str = "SELECT COUNT(*) FROM events";

#[derive(sqlx::FromRow)]
struct EventEnvelopeRow {
    event_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: crate::SequenceNumber,
    global_sequence: GlobalSequence,
    event_type: String,
    event_version: i32,
    payload: serde_json::Value,
    metadata: Option<serde_json::Value>,
    occurred_on: DateTime<Utc>,
    checksum: String,
    size_bytes: i64,
}

impl From<EventEnvelopeRow> for EventEnvelope {
    fn from(row: EventEnvelopeRow) -> Self {
        EventEnvelope {
            event_id: row.event_id,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            aggregate_version: row.sequence_number,
            global_sequence: row.global_sequence,
            event_type: row.event_type,
            event_version: row.event_version,
            payload: row.payload,
            metadata: row.metadata,
            created_at: row.occurred_on,
            checksum: row.checksum,
            size_bytes: row.size_bytes,
        }
    }
}

/// Type-erased reader over the whole event log, ordered by `global_sequence`, regardless of
/// aggregate type. Used by the projection engine (C7), which must observe every aggregate type's
/// events in a single total order.
#[derive(Clone)]
pub struct PgEventLog {
    pool: Pool<Postgres>,
}

impl PgEventLog {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    type Error = sqlx::Error;

    async fn current_global_sequence(&self) -> Result<GlobalSequence, Self::Error> {
        sqlx::query_scalar(CURRENT_GLOBAL_SEQUENCE).fetch_one(&self.pool).await
    }

    fn stream_all(&self, from_sequence: GlobalSequence) -> BoxStream<'_, Result<EventEnvelope, Self::Error>> {
        Box::pin(
            sqlx::query_as::<_, EventEnvelopeRow>(STREAM_ALL)
                .bind(from_sequence)
                .fetch(&self.pool)
                .map(|res| res.map(EventEnvelope::from)),
        )
    }

    fn stream_by_event_types<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        event_types: &'a [String],
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>> {
        Box::pin(
            sqlx::query_as::<_, EventEnvelopeRow>(STREAM_BY_EVENT_TYPES)
                .bind(from_sequence)
                .bind(event_types)
                .fetch(&self.pool)
                .map(|res| res.map(EventEnvelope::from)),
        )
    }

    fn stream_by_aggregate_types<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        aggregate_types: &'a [String],
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>> {
        Box::pin(
            sqlx::query_as::<_, EventEnvelopeRow>(STREAM_BY_AGGREGATE_TYPES)
                .bind(from_sequence)
                .bind(aggregate_types)
                .fetch(&self.pool)
                .map(|res| res.map(EventEnvelope::from)),
        )
    }

    fn stream_by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> BoxStream<'_, Result<EventEnvelope, Self::Error>> {
        Box::pin(
            sqlx::query_as::<_, EventEnvelopeRow>(STREAM_BY_TIME_RANGE)
                .bind(from)
                .bind(to)
                .fetch(&self.pool)
                .map(|res| res.map(EventEnvelope::from)),
        )
    }

    fn stream_by_metadata<'a>(
        &'a self,
        from_sequence: GlobalSequence,
        criteria: &'a MetadataCriteria,
    ) -> BoxStream<'a, Result<EventEnvelope, Self::Error>> {
        let object: serde_json::Value = serde_json::Value::Object(criteria.0.iter().cloned().collect());
        Box::pin(
            sqlx::query_as::<_, EventEnvelopeRow>(STREAM_BY_METADATA)
                .bind(from_sequence)
                .bind(object)
                .fetch(&self.pool)
                .map(|res| res.map(EventEnvelope::from)),
        )
    }

    async fn stats(&self) -> Result<EventLogStats, Self::Error> {
        let total_events: i64 = sqlx::query_scalar(STATS_TOTAL).fetch_one(&self.pool).await?;
        let by_aggregate_type: Vec<(String, i64)> = sqlx::query_as(STATS_BY_AGGREGATE_TYPE).fetch_all(&self.pool).await?;
        let by_event_type: Vec<(String, i64)> = sqlx::query_as(STATS_BY_EVENT_TYPE).fetch_all(&self.pool).await?;

        Ok(EventLogStats {
            total_events,
            by_aggregate_type,
            by_event_type,
        })
    }
}
