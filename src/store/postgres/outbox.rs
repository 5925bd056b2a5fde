//! Postgres-backed [`OutboxStore`], claiming pending rows with `SELECT ... FOR UPDATE SKIP LOCKED`
//! so multiple dispatcher processes can drain the same `event_outbox` table without double-claiming
//! a row, grounded on the `transactional-outbox` sibling example's claim query.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::outbox::{OutboxError, OutboxMessage, OutboxRow, OutboxStatus, OutboxStore};

const STAGE: &str = r#"
INSERT INTO event_outbox
    (id, event_id, aggregate_id, aggregate_type, event_type, destination, payload, metadata,
     priority, partition_key, tenant_id, correlation_id, max_retries, status, attempts, available_at, created_at)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'pending', 0, now(), now())
"#;

/// Claims up to `$1` pending rows and flips them to `processing` in the same statement: the
/// `FOR UPDATE SKIP LOCKED` subquery and the `UPDATE` it feeds run as one atomic operation, so no
/// window exists where a row is unlocked but still `pending` for a second dispatcher to re-claim.
/// The `NOT EXISTS` clause serializes rows sharing a `partition_key`: a row is only eligible while
/// no other row with the same key is already `processing`, which keeps same-key deliveries in
/// `created_at` order without blocking unrelated partitions.
const CLAIM_BATCH: &str = r#"
UPDATE event_outbox
SET status = 'processing'
WHERE id IN (
    SELECT o.id
    FROM event_outbox o
    WHERE o.status = 'pending'
      AND o.available_at <= now()
      AND NOT EXISTS (
          SELECT 1 FROM event_outbox p
          WHERE p.partition_key IS NOT NULL
            AND p.partition_key = o.partition_key
            AND p.status = 'processing'
      )
    ORDER BY o.priority ASC, o.created_at ASC
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
RETURNING id, event_id, aggregate_id, aggregate_type, event_type, destination, payload, metadata,
    priority, partition_key, tenant_id, correlation_id, status, attempts, max_retries, last_error
"#;

const MARK_DELIVERED: &str = r#"
UPDATE event_outbox SET status = 'delivered', published_at = now() WHERE id = $1
"#;

const MARK_FAILED: &str = r#"
UPDATE event_outbox
SET attempts = attempts + 1,
    last_error = $2,
    status = CASE WHEN attempts + 1 >= max_retries THEN 'poisoned' ELSE 'pending' END,
    available_at = now() + (least(power(2, attempts + 1), 60) * interval '1 second')
WHERE id = $1
"#;

const GC_DELIVERED: &str = r#"
DELETE FROM event_outbox WHERE status = 'delivered' AND published_at < $1
"#;

fn row_to_outbox_row(row: PgRow) -> Result<OutboxRow, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "pending" => OutboxStatus::Pending,
        "processing" => OutboxStatus::Processing,
        "delivered" => OutboxStatus::Delivered,
        _ => OutboxStatus::Poisoned,
    };

    Ok(OutboxRow {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        destination: row.try_get("destination")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        priority: row.try_get("priority")?,
        partition_key: row.try_get("partition_key")?,
        tenant_id: row.try_get("tenant_id")?,
        correlation_id: row.try_get("correlation_id")?,
        status,
        attempts: row.try_get("attempts")?,
        max_retries: row.try_get("max_retries")?,
        last_error: row.try_get("last_error")?,
    })
}

/// Postgres-backed [`OutboxStore`] against the `event_outbox` table created by
/// [`crate::sql::migrations::Migrations`].
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: Pool<Postgres>,
}

impl PgOutboxStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxStore for PgOutboxStore {
    type Executor<'c> = sqlx::Transaction<'c, Postgres>;
    type Error = OutboxError;

    #[tracing::instrument(skip_all, fields(event_id = %message.event_id, destination = message.destination))]
    async fn stage<'c>(&self, executor: &mut Self::Executor<'c>, message: OutboxMessage) -> Result<(), Self::Error> {
        sqlx::query(STAGE)
            .bind(Uuid::new_v4())
            .bind(message.event_id)
            .bind(message.aggregate_id)
            .bind(message.aggregate_type)
            .bind(message.event_type)
            .bind(message.destination)
            .bind(message.payload)
            .bind(message.metadata)
            .bind(message.priority)
            .bind(message.partition_key)
            .bind(message.tenant_id)
            .bind(message.correlation_id)
            .bind(message.max_retries)
            .execute(&mut **executor)
            .await
            .map_err(|error| OutboxError::Storage(Box::new(error)))?;

        Ok(())
    }

    /// A single `UPDATE ... RETURNING` statement: the claim and the transition to `processing`
    /// happen atomically, so there is no window in which a claimed row is both unlocked and still
    /// `pending`.
    #[tracing::instrument(skip(self))]
    async fn claim_batch(&self, batch_size: i64) -> Result<Vec<OutboxRow>, Self::Error> {
        let rows = sqlx::query(CLAIM_BATCH)
            .bind(batch_size)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| OutboxError::Storage(Box::new(error)))?;

        rows.into_iter()
            .map(|row| row_to_outbox_row(row).map_err(|error| OutboxError::Storage(Box::new(error))))
            .collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<(), Self::Error> {
        sqlx::query(MARK_DELIVERED)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| OutboxError::Storage(Box::new(error)))?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), Self::Error> {
        sqlx::query(MARK_FAILED)
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|error| OutboxError::Storage(Box::new(error)))?;

        Ok(())
    }

    async fn gc_delivered(&self, older_than: chrono::Duration) -> Result<u64, Self::Error> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(GC_DELIVERED)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|error| OutboxError::Storage(Box::new(error)))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(destination: &str) -> OutboxMessage {
        OutboxMessage {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            aggregate_type: "order".to_string(),
            event_type: "order.created".to_string(),
            destination: destination.to_string(),
            payload: serde_json::json!({"a": 1}),
            metadata: None,
            priority: 0,
            partition_key: None,
            tenant_id: None,
            correlation_id: None,
            max_retries: 10,
        }
    }

    #[sqlx::test]
    async fn stages_and_claims_a_row(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store = PgOutboxStore::new(pool.clone());

        let mut tx = pool.begin().await.unwrap();
        store.stage(&mut tx, test_message("orders.created")).await.unwrap();
        tx.commit().await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Processing);
    }

    #[sqlx::test]
    async fn claimed_rows_are_not_claimed_again(pool: Pool<Postgres>) {
        // Regression test for a race where the claiming transaction committed without ever
        // transitioning the row out of `pending`, letting a second claim pick it up again.
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store = PgOutboxStore::new(pool.clone());

        let mut tx = pool.begin().await.unwrap();
        store.stage(&mut tx, test_message("orders.created")).await.unwrap();
        tx.commit().await.unwrap();

        let first_claim = store.claim_batch(10).await.unwrap();
        assert_eq!(first_claim.len(), 1);

        let second_claim = store.claim_batch(10).await.unwrap();
        assert!(second_claim.is_empty(), "a row already in flight must not be claimable again");
    }

    #[sqlx::test]
    async fn claim_batch_orders_by_priority_then_age(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store = PgOutboxStore::new(pool.clone());

        let mut low_priority = test_message("low");
        low_priority.priority = 10;
        let mut high_priority = test_message("high");
        high_priority.priority = 0;

        let mut tx = pool.begin().await.unwrap();
        store.stage(&mut tx, low_priority).await.unwrap();
        store.stage(&mut tx, high_priority).await.unwrap();
        tx.commit().await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].destination, "high");
        assert_eq!(claimed[1].destination, "low");
    }

    #[sqlx::test]
    async fn partition_key_rows_serialize(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store = PgOutboxStore::new(pool.clone());

        let mut first = test_message("d");
        first.partition_key = Some("order-1".to_string());
        let mut second = test_message("d");
        second.partition_key = Some("order-1".to_string());

        let mut tx = pool.begin().await.unwrap();
        store.stage(&mut tx, first).await.unwrap();
        store.stage(&mut tx, second).await.unwrap();
        tx.commit().await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1, "only one row per partition_key may be in flight at a time");
    }

    #[sqlx::test]
    async fn mark_failed_poisons_after_max_retries(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store = PgOutboxStore::new(pool.clone());

        let mut message = test_message("d");
        message.max_retries = 1;

        let mut tx = pool.begin().await.unwrap();
        store.stage(&mut tx, message).await.unwrap();
        tx.commit().await.unwrap();

        let claimed = store.claim_batch(10).await.unwrap();
        let id = claimed[0].id;

        store.mark_failed(id, "boom").await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT status FROM event_outbox WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, "poisoned");
    }
}
