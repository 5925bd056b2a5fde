//! Postgres-backed [`ProjectionCursorStore`] against the `projection_cursors` table created by
//! [`crate::sql::migrations::Migrations`].

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::projection::{ProjectionCursorStore, ProjectionStatus};
use crate::GlobalSequence;

const LOAD_CURSOR: &str = "SELECT global_sequence FROM projection_cursors WHERE projection_name = $1";

const UPSERT_CURSOR: &str = r#"
INSERT INTO projection_cursors (projection_name, global_sequence, status, updated_at)
VALUES ($1, $2, $3, now())
ON CONFLICT (projection_name) DO UPDATE SET global_sequence = EXCLUDED.global_sequence, status = EXCLUDED.status, updated_at = now()
"#;

const RESET_CURSOR: &str = r#"
INSERT INTO projection_cursors (projection_name, global_sequence, status, updated_at)
VALUES ($1, 0, 'running', now())
ON CONFLICT (projection_name) DO UPDATE SET global_sequence = 0, status = 'running', updated_at = now()
"#;

const LAST_UPDATED: &str = "SELECT updated_at FROM projection_cursors WHERE projection_name = $1";

/// Postgres-backed [`ProjectionCursorStore`].
#[derive(Clone)]
pub struct PgProjectionCursorStore {
    pool: Pool<Postgres>,
}

impl PgProjectionCursorStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProjectionCursorStore for PgProjectionCursorStore {
    type Error = sqlx::Error;

    async fn load_cursor(&self, projection_name: &str) -> Result<GlobalSequence, Self::Error> {
        let cursor: Option<GlobalSequence> = sqlx::query_scalar(LOAD_CURSOR).bind(projection_name).fetch_optional(&self.pool).await?;
        Ok(cursor.unwrap_or(0))
    }

    async fn advance_cursor(&self, projection_name: &str, position: GlobalSequence, status: ProjectionStatus) -> Result<(), Self::Error> {
        sqlx::query(UPSERT_CURSOR)
            .bind(projection_name)
            .bind(position)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_cursor(&self, projection_name: &str) -> Result<(), Self::Error> {
        sqlx::query(RESET_CURSOR).bind(projection_name).execute(&self.pool).await?;
        Ok(())
    }

    async fn last_updated(&self, projection_name: &str) -> Result<Option<DateTime<Utc>>, Self::Error> {
        sqlx::query_scalar(LAST_UPDATED).bind(projection_name).fetch_optional(&self.pool).await
    }
}
