use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::event::Checksum;
use crate::store::{postgres::PgStoreError, postgres::Schema, StoreEvent};
use crate::{GlobalSequence, SequenceNumber};

/// Row shape of the shared `events` table (see [`crate::sql::migrations`]).
#[derive(sqlx::FromRow, serde::Serialize, serde::Deserialize, Debug)]
pub struct DbEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub sequence_number: SequenceNumber,
    pub global_sequence: GlobalSequence,
    pub event_type: String,
    pub event_version: i32,
    pub payload: Value,
    pub metadata: Option<Value>,
    pub occurred_on: DateTime<Utc>,
    pub checksum: String,
    pub size_bytes: i64,
}

impl DbEvent {
    /// Verifies the row's checksum, upcasts its payload to the schema type's current shape, and
    /// finally converts it into a [`StoreEvent`]. Returns `Ok(None)` when [`Schema::read`] reports
    /// the row maps to a deprecated event that should be silently skipped.
    pub fn try_into_store_event<E, S>(self) -> Result<Option<StoreEvent<E>>, PgStoreError>
    where
        S: Schema<E>,
    {
        Checksum::verify(self.id, &self.payload, &self.checksum).map_err(|source| PgStoreError::Codec(source))?;

        #[cfg(feature = "upcasting")]
        let schema: S = crate::event::Upcaster::upcast(self.payload, Some(self.event_version))?;
        #[cfg(not(feature = "upcasting"))]
        let schema: S = serde_json::from_value(self.payload)?;

        Ok(schema.read().map(|payload| StoreEvent {
            id: self.id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            payload,
            metadata: self.metadata,
            occurred_on: self.occurred_on,
            sequence_number: self.sequence_number,
            global_sequence: self.global_sequence,
            version: Some(self.event_version),
        }))
    }
}
