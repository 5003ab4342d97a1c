//! # Idempotency Repository
//!
//! Remembers the receipt returned for each committed idempotency key, so a
//! till that retries after a timeout gets the original sale back instead of
//! a second one.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  commit_sale(key)                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  check_in(key)  ── DELETE expired row for key (takes write lock)       │
//! │       │            SELECT row                                           │
//! │       ├── AlreadyHandled(record) → return stored receipt, no writes    │
//! │       └── FirstSeen                                                    │
//! │             │                                                           │
//! │             ▼                                                           │
//! │       ... stock, sale, loyalty ...                                     │
//! │             │                                                           │
//! │             ▼                                                           │
//! │       record_in(key, receipt) ── same transaction as the sale          │
//! │             │                                                           │
//! │             ▼                                                           │
//! │       COMMIT                                                           │
//! │                                                                         │
//! │  purge_expired() runs periodically in the server.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the key row commits with the sale, a crash between the two is
//! impossible: either both exist or neither does.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

/// A stored replay record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub sale_id: String,
    pub response_json: String,
    /// Canonical form of the request that committed under this key.
    pub request_fingerprint: String,
    pub created_at: DateTime<Utc>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl IdempotencyRecord {
    /// Whether `fingerprint` describes the request that committed.
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.request_fingerprint == fingerprint
    }

    /// Deserializes the stored response.
    pub fn response<T: DeserializeOwned>(&self) -> DbResult<T> {
        Ok(serde_json::from_str(&self.response_json)?)
    }
}

/// Outcome of looking up a key inside a commit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// No live record. Proceed with the commit.
    FirstSeen,
    /// Key already committed. Replay this record.
    AlreadyHandled(IdempotencyRecord),
}

/// Repository for idempotency keys.
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: SqlitePool,
}

impl IdempotencyRepository {
    /// Creates a new IdempotencyRepository.
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyRepository { pool }
    }

    /// Checks a key inside the caller's transaction.
    ///
    /// An expired record for this key is deleted first and the key is then
    /// treated as new.
    pub async fn check_in(
        conn: &mut SqliteConnection,
        key: &str,
        now: DateTime<Utc>,
    ) -> DbResult<IdempotencyCheck> {
        sqlx::query("DELETE FROM idempotency_keys WHERE key = ?1 AND expires_at <= ?2")
            .bind(key)
            .bind(now.timestamp())
            .execute(&mut *conn)
            .await?;

        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT key, sale_id, response_json, request_fingerprint, created_at, expires_at
            FROM idempotency_keys
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(match record {
            Some(record) => {
                debug!(key, sale_id = %record.sale_id, "Idempotency key already handled");
                IdempotencyCheck::AlreadyHandled(record)
            }
            None => IdempotencyCheck::FirstSeen,
        })
    }

    /// Stores the response for a key inside the caller's transaction.
    pub async fn record_in<T: Serialize>(
        conn: &mut SqliteConnection,
        key: &str,
        sale_id: &str,
        fingerprint: &str,
        response: &T,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DbResult<()> {
        let response_json = serde_json::to_string(response)?;
        let expires_at = (now + ttl).timestamp();

        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (
                key, sale_id, response_json, request_fingerprint, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(key)
        .bind(sale_id)
        .bind(response_json)
        .bind(fingerprint)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// [`Self::check_in`] in its own transaction.
    pub async fn check_or_reserve(&self, key: &str) -> DbResult<IdempotencyCheck> {
        let mut tx = self.pool.begin().await?;
        let check = Self::check_in(&mut tx, key, Utc::now()).await?;
        tx.commit().await?;
        Ok(check)
    }

    /// Looks up a live record outside any commit.
    pub async fn lookup(&self, key: &str) -> DbResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT key, sale_id, response_json, request_fingerprint, created_at, expires_at
            FROM idempotency_keys
            WHERE key = ?1 AND expires_at > ?2
            "#,
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Deletes every record expired at `now`. Returns how many went.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= ?1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        debug!(purged, "Expired idempotency keys deleted");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::testing::seeded_db;
    use crate::Database;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        sale_number: String,
    }

    /// Idempotency rows reference a sale, so tests need one.
    async fn insert_sale(db: &Database, id: &str) {
        sqlx::query(
            r#"
            INSERT INTO sales (
                id, sale_number, branch_id, cashier_id,
                subtotal_cents, tax_cents, discount_cents, total_cents,
                payment_method, created_at
            ) VALUES (?1, ?1, 1, 9, 0, 0, 0, 0, 'cash', ?2)
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .unwrap();
    }

    async fn record(db: &Database, key: &str, sale_id: &str, now: DateTime<Utc>, ttl: Duration) {
        let mut tx = db.begin().await.unwrap();
        IdempotencyRepository::record_in(
            &mut tx,
            key,
            sale_id,
            "fp",
            &Receipt {
                sale_number: "MAIN-000001".into(),
            },
            now,
            ttl,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_first_seen_then_already_handled() {
        let db = seeded_db().await;
        insert_sale(&db, "s1").await;
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(
            IdempotencyRepository::check_in(&mut tx, "k1", now).await.unwrap(),
            IdempotencyCheck::FirstSeen
        );
        drop(tx);

        record(&db, "k1", "s1", now, Duration::hours(24)).await;

        let mut tx = db.begin().await.unwrap();
        match IdempotencyRepository::check_in(&mut tx, "k1", now).await.unwrap() {
            IdempotencyCheck::AlreadyHandled(record) => {
                assert_eq!(record.sale_id, "s1");
                assert!(record.matches("fp"));
                assert!(!record.matches("other"));
                let receipt: Receipt = record.response().unwrap();
                assert_eq!(receipt.sale_number, "MAIN-000001");
            }
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_key_is_treated_as_new() {
        let db = seeded_db().await;
        insert_sale(&db, "s1").await;
        let then = Utc::now() - Duration::hours(48);

        record(&db, "old", "s1", then, Duration::hours(24)).await;
        assert!(db.idempotency().lookup("old").await.unwrap().is_none());

        let mut tx = db.begin().await.unwrap();
        let check = IdempotencyRepository::check_in(&mut tx, "old", Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(check, IdempotencyCheck::FirstSeen);
    }

    #[tokio::test]
    async fn test_duplicate_record_is_unique_violation() {
        let db = seeded_db().await;
        insert_sale(&db, "s1").await;
        let now = Utc::now();
        record(&db, "k", "s1", now, Duration::hours(1)).await;

        let mut tx = db.begin().await.unwrap();
        let err = IdempotencyRepository::record_in(&mut tx, "k", "s1", "fp", &1u8, now, Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = seeded_db().await;
        insert_sale(&db, "s1").await;
        let now = Utc::now();

        record(&db, "stale", "s1", now - Duration::hours(30), Duration::hours(24)).await;
        record(&db, "fresh", "s1", now, Duration::hours(24)).await;

        assert_eq!(db.idempotency().purge_expired(now).await.unwrap(), 1);
        assert!(db.idempotency().lookup("fresh").await.unwrap().is_some());
    }
}
