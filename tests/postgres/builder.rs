use sqlx::{Pool, Postgres};

use escore::store::postgres::{PgStore, PgStoreBuilder};

use crate::aggregate::TestAggregate;

#[sqlx::test]
async fn builder_can_skip_migrations_test(pool: Pool<Postgres>) {
    let _store: PgStore<TestAggregate> = PgStoreBuilder::new(pool.clone())
        .without_running_migrations()
        .try_build()
        .await
        .unwrap();

    assert!(!table_exists("events", &pool).await);
}

#[sqlx::test]
async fn builder_run_migrations_test(pool: Pool<Postgres>) {
    assert!(!table_exists("events", &pool).await);

    let _: PgStore<TestAggregate> = PgStoreBuilder::new(pool.clone()).try_build().await.unwrap();

    assert!(table_exists("events", &pool).await);
}

async fn table_exists(table_name: &str, pool: &Pool<Postgres>) -> bool {
    !sqlx::query("SELECT table_name FROM information_schema.columns WHERE table_name = $1")
        .bind(table_name)
        .fetch_all(pool)
        .await
        .unwrap()
        .is_empty()
}
