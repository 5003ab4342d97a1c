//! # Sale Number Repository
//!
//! Human-readable, per-branch sale numbers: `{BRANCH CODE}-{NNNNNN}`.
//!
//! ```text
//! MAIN-000001, MAIN-000002, ...    NORTH-000001, ...
//! ```
//!
//! The counter row is bumped with a single upsert inside the sale's own
//! transaction. A rolled-back sale rolls its number back too, so numbers
//! are gap-free per branch among committed sales.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::catalog::CatalogRepository;
use tally_core::CoreError;

/// Repository for per-branch sale number counters.
#[derive(Debug, Clone)]
pub struct SaleNumberRepository {
    pool: SqlitePool,
}

impl SaleNumberRepository {
    /// Creates a new SaleNumberRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleNumberRepository { pool }
    }

    /// Issues the next number for `branch_id` in its own transaction.
    pub async fn issue(&self, branch_id: i64) -> DbResult<String> {
        let mut tx = self.pool.begin().await?;
        let number = Self::issue_in(&mut tx, branch_id).await?;
        tx.commit().await?;
        Ok(number)
    }

    /// Issues the next number for `branch_id` inside the caller's transaction.
    pub async fn issue_in(conn: &mut SqliteConnection, branch_id: i64) -> DbResult<String> {
        let branch = CatalogRepository::branch_in(conn, branch_id)
            .await?
            .ok_or(CoreError::BranchNotFound(branch_id))?;

        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sale_number_counters (branch_id, last_value) VALUES (?1, 1)
            ON CONFLICT(branch_id) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(branch_id)
        .fetch_one(&mut *conn)
        .await?;

        let number = format_sale_number(&branch.code, value);
        debug!(branch_id, sale_number = %number, "Issued sale number");
        Ok(number)
    }

    /// Last value issued for a branch, 0 if none.
    pub async fn last_issued(&self, branch_id: i64) -> DbResult<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT last_value FROM sale_number_counters WHERE branch_id = ?1")
                .bind(branch_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or(0))
    }
}

/// Formats a sale number. Values past 999999 simply grow wider.
pub fn format_sale_number(branch_code: &str, value: i64) -> String {
    format!("{branch_code}-{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::testing::seeded_db;

    #[test]
    fn test_format_sale_number() {
        assert_eq!(format_sale_number("MAIN", 1), "MAIN-000001");
        assert_eq!(format_sale_number("N", 1_234_567), "N-1234567");
    }

    #[tokio::test]
    async fn test_numbers_are_sequential_per_branch() {
        let db = seeded_db().await;
        let numbers = db.sale_numbers();

        assert_eq!(numbers.issue(1).await.unwrap(), "MAIN-000001");
        assert_eq!(numbers.issue(1).await.unwrap(), "MAIN-000002");
        assert_eq!(numbers.issue(2).await.unwrap(), "NORTH-000001");
        assert_eq!(numbers.last_issued(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rolled_back_number_is_reissued() {
        let db = seeded_db().await;

        let mut tx = db.begin().await.unwrap();
        let first = SaleNumberRepository::issue_in(&mut tx, 1).await.unwrap();
        tx.rollback().await.unwrap();

        let again = db.sale_numbers().issue(1).await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_unknown_branch() {
        let db = seeded_db().await;
        let err = db.sale_numbers().issue(77).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::BranchNotFound(77))));
    }
}
