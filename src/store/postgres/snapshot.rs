//! Postgres-backed [`SnapshotStore`], caching the most recently loaded snapshot per aggregate
//! instance behind a [`RwLock`] the same way [`super::event_store::InnerPgStore`] caches its event
//! handler list.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Pool, Postgres};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::{Aggregate, SequenceNumber};

const UPSERT: &str = r#"
INSERT INTO snapshots (aggregate_id, aggregate_type, sequence_number, state, taken_at)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (aggregate_id, sequence_number) DO UPDATE SET state = EXCLUDED.state, taken_at = EXCLUDED.taken_at
"#;

const LOAD_LATEST: &str = r#"
SELECT sequence_number, state, taken_at FROM snapshots
WHERE aggregate_id = $1 AND aggregate_type = $2
ORDER BY sequence_number DESC LIMIT 1
"#;

const LOAD_AT_VERSION: &str = r#"
SELECT sequence_number, state, taken_at FROM snapshots
WHERE aggregate_id = $1 AND aggregate_type = $2 AND sequence_number <= $3
ORDER BY sequence_number DESC LIMIT 1
"#;

const DELETE: &str = r#"
DELETE FROM snapshots WHERE aggregate_id = $1 AND aggregate_type = $2
"#;

/// Per aggregate instance, ranks snapshots newest-first and deletes anything past `keep_count`
/// (`$2`) or older than the cutoff (`$3`), whichever catches it first.
const COMPACT: &str = r#"
DELETE FROM snapshots
WHERE aggregate_type = $1
  AND (aggregate_id, sequence_number) IN (
      SELECT aggregate_id, sequence_number
      FROM (
          SELECT aggregate_id, sequence_number, taken_at,
                 ROW_NUMBER() OVER (PARTITION BY aggregate_id ORDER BY sequence_number DESC) AS rank
          FROM snapshots
          WHERE aggregate_type = $1
      ) ranked
      WHERE rank > $2 OR taken_at < $3
  )
"#;

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    sequence_number: SequenceNumber,
    state: serde_json::Value,
    taken_at: chrono::DateTime<chrono::Utc>,
}

/// Postgres-backed [`SnapshotStore`] for a single aggregate type, with an in-process read-through
/// cache of the latest snapshot per instance.
pub struct PgSnapshotStore<A>
where
    A: Aggregate,
{
    pool: Pool<Postgres>,
    cache: Arc<RwLock<HashMap<Uuid, Snapshot<A::State>>>>,
    _aggregate: PhantomData<A>,
}

impl<A> PgSnapshotStore<A>
where
    A: Aggregate,
{
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
            _aggregate: PhantomData,
        }
    }
}

impl<A> Clone for PgSnapshotStore<A>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            cache: Arc::clone(&self.cache),
            _aggregate: PhantomData,
        }
    }
}

#[async_trait]
impl<A> SnapshotStore<A> for PgSnapshotStore<A>
where
    A: Aggregate,
    A::State: serde::Serialize + serde::de::DeserializeOwned,
{
    type Error = SnapshotError;

    #[tracing::instrument(skip_all, fields(aggregate_id = %snapshot.aggregate_id))]
    async fn save(&self, snapshot: Snapshot<A::State>) -> Result<(), Self::Error> {
        let state_json = serde_json::to_value(&snapshot.state)?;

        sqlx::query(UPSERT)
            .bind(snapshot.aggregate_id)
            .bind(A::NAME)
            .bind(snapshot.sequence_number)
            .bind(Json(&state_json))
            .bind(snapshot.taken_at)
            .execute(&self.pool)
            .await
            .map_err(|error| SnapshotError::Storage(Box::new(error)))?;

        self.cache.write().await.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn load_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot<A::State>>, Self::Error> {
        if let Some(cached) = self.cache.read().await.get(&aggregate_id) {
            return Ok(Some(cached.clone()));
        }

        let row: Option<SnapshotRow> = sqlx::query_as(LOAD_LATEST)
            .bind(aggregate_id)
            .bind(A::NAME)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| SnapshotError::Storage(Box::new(error)))?;

        let snapshot = row
            .map(|row| {
                Ok::<_, serde_json::Error>(Snapshot {
                    aggregate_id,
                    sequence_number: row.sequence_number,
                    state: serde_json::from_value(row.state)?,
                    taken_at: row.taken_at,
                })
            })
            .transpose()?;

        if let Some(ref snapshot) = snapshot {
            self.cache.write().await.insert(aggregate_id, snapshot.clone());
        }

        Ok(snapshot)
    }

    async fn load_at_version(
        &self,
        aggregate_id: Uuid,
        max_sequence_number: SequenceNumber,
    ) -> Result<Option<Snapshot<A::State>>, Self::Error> {
        let row: Option<SnapshotRow> = sqlx::query_as(LOAD_AT_VERSION)
            .bind(aggregate_id)
            .bind(A::NAME)
            .bind(max_sequence_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| SnapshotError::Storage(Box::new(error)))?;

        row.map(|row| {
            Ok::<_, serde_json::Error>(Snapshot {
                aggregate_id,
                sequence_number: row.sequence_number,
                state: serde_json::from_value(row.state)?,
                taken_at: row.taken_at,
            })
        })
        .transpose()
        .map_err(SnapshotError::from)
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), Self::Error> {
        sqlx::query(DELETE)
            .bind(aggregate_id)
            .bind(A::NAME)
            .execute(&self.pool)
            .await
            .map_err(|error| SnapshotError::Storage(Box::new(error)))?;

        self.cache.write().await.remove(&aggregate_id);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn compact(&self, keep_count: u32, max_age: std::time::Duration) -> Result<u64, Self::Error> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let result = sqlx::query(COMPACT)
            .bind(A::NAME)
            .bind(keep_count as i64)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|error| SnapshotError::Storage(Box::new(error)))?;

        // Any cached entry may have just been pruned; simplest to drop the whole cache and let it
        // repopulate on the next `load_latest` rather than track which aggregate ids were hit.
        self.cache.write().await.clear();

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use sqlx::{Pool, Postgres};

    use super::*;

    struct TestAggregate;

    #[derive(Clone, serde::Serialize, serde::Deserialize)]
    struct TestState {
        count: i32,
    }

    impl Aggregate for TestAggregate {
        const NAME: &'static str = "snapshot_test";
        type State = TestState;
        type Command = ();
        type Event = ();
        type Error = std::convert::Infallible;

        fn handle_command(_state: &Self::State, _command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            Ok(vec![])
        }

        fn apply_event(state: Self::State, _event: Self::Event) -> Result<Self::State, crate::aggregate::AggregateError> {
            Ok(state)
        }
    }

    fn snapshot(aggregate_id: Uuid, sequence_number: SequenceNumber, count: i32) -> Snapshot<TestState> {
        Snapshot {
            aggregate_id,
            sequence_number,
            state: TestState { count },
            taken_at: Utc::now(),
        }
    }

    #[sqlx::test]
    async fn saves_and_loads_latest(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store: PgSnapshotStore<TestAggregate> = PgSnapshotStore::new(pool);

        let aggregate_id = Uuid::new_v4();
        store.save(snapshot(aggregate_id, 1, 10)).await.unwrap();
        store.save(snapshot(aggregate_id, 2, 20)).await.unwrap();

        let latest = store.load_latest(aggregate_id).await.unwrap().unwrap();
        assert_eq!(latest.sequence_number, 2);
        assert_eq!(latest.state.count, 20);
    }

    #[sqlx::test]
    async fn loads_at_version(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store: PgSnapshotStore<TestAggregate> = PgSnapshotStore::new(pool);

        let aggregate_id = Uuid::new_v4();
        store.save(snapshot(aggregate_id, 1, 10)).await.unwrap();
        store.save(snapshot(aggregate_id, 5, 50)).await.unwrap();

        let at_version = store.load_at_version(aggregate_id, 3).await.unwrap().unwrap();
        assert_eq!(at_version.sequence_number, 1);

        let none_before_first = store.load_at_version(aggregate_id, 0).await.unwrap();
        assert!(none_before_first.is_none());
    }

    #[sqlx::test]
    async fn delete_removes_every_snapshot_and_the_cache_entry(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store: PgSnapshotStore<TestAggregate> = PgSnapshotStore::new(pool);

        let aggregate_id = Uuid::new_v4();
        store.save(snapshot(aggregate_id, 1, 10)).await.unwrap();
        store.load_latest(aggregate_id).await.unwrap();

        store.delete(aggregate_id).await.unwrap();

        assert!(store.load_latest(aggregate_id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn compact_keeps_only_the_newest_per_aggregate(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store: PgSnapshotStore<TestAggregate> = PgSnapshotStore::new(pool.clone());

        let aggregate_id = Uuid::new_v4();
        for sequence_number in 1..=5 {
            store
                .save(snapshot(aggregate_id, sequence_number, sequence_number as i32))
                .await
                .unwrap();
        }

        let deleted = store.compact(2, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(deleted, 3);

        let remaining: Vec<SequenceNumber> = sqlx::query_scalar("SELECT sequence_number FROM snapshots WHERE aggregate_id = $1 ORDER BY sequence_number")
            .bind(aggregate_id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![4, 5]);
    }

    #[sqlx::test]
    async fn compact_drops_snapshots_older_than_max_age(pool: Pool<Postgres>) {
        crate::sql::migrations::Migrations::run(&pool).await.unwrap();
        let store: PgSnapshotStore<TestAggregate> = PgSnapshotStore::new(pool.clone());

        let aggregate_id = Uuid::new_v4();
        let mut stale = snapshot(aggregate_id, 1, 1);
        stale.taken_at = Utc::now() - chrono::Duration::days(60);
        store.save(stale).await.unwrap();
        store.save(snapshot(aggregate_id, 2, 2)).await.unwrap();

        let deleted = store.compact(10, Duration::from_secs(30 * 24 * 3600)).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: Vec<SequenceNumber> = sqlx::query_scalar("SELECT sequence_number FROM snapshots WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec![2]);
    }
}
