//! Prepared statement text for the shared `events` table.
//!
//! Every aggregate type is a row filter (`aggregate_type = $1`) over one physical table rather
//! than a table of its own — see [`crate::sql::migrations`] for why: the projection engine needs
//! one `global_sequence` order spanning every aggregate type, which a table-per-aggregate layout
//! can't give it without a second, separately-maintained index.

use async_trait::async_trait;

use crate::Aggregate;

const INSERT: &str = r#"
INSERT INTO events (id, aggregate_id, aggregate_type, sequence_number, event_type, event_version, payload, metadata, occurred_on, checksum, size_bytes)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
RETURNING global_sequence
"#;

const BY_AGGREGATE_ID: &str = r#"
SELECT * FROM events WHERE aggregate_id = $1 AND aggregate_type = $2 ORDER BY sequence_number ASC
"#;

const SELECT_ALL: &str = r#"
SELECT * FROM events WHERE aggregate_type = $1 ORDER BY sequence_number ASC
"#;

const DELETE_BY_AGGREGATE_ID: &str = r#"
DELETE FROM events WHERE aggregate_id = $1 AND aggregate_type = $2
"#;

const GET_VERSION: &str = r#"
SELECT COALESCE(MAX(sequence_number), 0) FROM events WHERE aggregate_id = $1 AND aggregate_type = $2
"#;

/// Trait used to build the statements needed by a Postgres-backed store, parametrized over the
/// concrete aggregate type so `Statements::new::<A>()` can bind `A::NAME` into every query.
#[async_trait]
pub trait StatementsHandler {
    fn new<A: Aggregate>() -> Self;
}

/// Holds the aggregate type discriminator bound into every query issued against the shared
/// `events` table.
#[derive(Debug, Clone)]
pub struct Statements {
    aggregate_type: &'static str,
}

impl StatementsHandler for Statements {
    fn new<A: Aggregate>() -> Self {
        Self {
            aggregate_type: A::NAME,
        }
    }
}

impl Statements {
    /// The `aggregate_type` discriminator this set of statements is scoped to.
    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn insert(&self) -> &'static str {
        INSERT
    }

    pub fn by_aggregate_id(&self) -> &'static str {
        BY_AGGREGATE_ID
    }

    pub fn select_all(&self) -> &'static str {
        SELECT_ALL
    }

    pub fn delete_by_aggregate_id(&self) -> &'static str {
        DELETE_BY_AGGREGATE_ID
    }

    pub fn get_version(&self) -> &'static str {
        GET_VERSION
    }
}
