//! # Customer Repository
//!
//! Loyalty balances, lifetime purchase totals and the loyalty ledger.
//!
//! Balance changes and their ledger entries are always written in the same
//! transaction as the sale or refund that caused them.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::{CoreError, Customer, LoyaltyTransaction};

const LOYALTY_COLUMNS: &str =
    "id, customer_id, sale_id, transaction_type, points, description, created_at";

/// Repository for customers and loyalty.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a customer by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT id, name, loyalty_points, total_purchases_cents FROM customers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    /// Gets a customer inside the caller's transaction.
    pub async fn get_by_id_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            "SELECT id, name, loyalty_points, total_purchases_cents FROM customers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(customer)
    }

    /// Loyalty ledger for a customer, newest first.
    pub async fn loyalty_history(
        &self,
        customer_id: i64,
        limit: i64,
    ) -> DbResult<Vec<LoyaltyTransaction>> {
        let entries = sqlx::query_as::<_, LoyaltyTransaction>(&format!(
            r#"
            SELECT {LOYALTY_COLUMNS}
            FROM loyalty_transactions
            WHERE customer_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#
        ))
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Credits a sale to a customer: points earned and lifetime purchases.
    pub async fn apply_purchase_in(
        conn: &mut SqliteConnection,
        customer_id: i64,
        total_cents: i64,
        points: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE customers SET
                loyalty_points = loyalty_points + ?2,
                total_purchases_cents = total_purchases_cents + ?3
            WHERE id = ?1
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .bind(total_cents)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::CustomerNotFound(customer_id).into());
        }

        debug!(customer_id, points, total_cents, "Purchase applied");
        Ok(())
    }

    /// Takes a refunded sale back off a customer.
    ///
    /// `points` must already be clamped to the balance. Lifetime purchases
    /// stop at zero.
    pub async fn reverse_purchase_in(
        conn: &mut SqliteConnection,
        customer_id: i64,
        total_cents: i64,
        points: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE customers SET
                loyalty_points = MAX(loyalty_points - ?2, 0),
                total_purchases_cents = MAX(total_purchases_cents - ?3, 0)
            WHERE id = ?1
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .bind(total_cents)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::CustomerNotFound(customer_id).into());
        }

        debug!(customer_id, points, total_cents, "Purchase reversed");
        Ok(())
    }

    /// Appends a loyalty ledger entry.
    pub async fn insert_loyalty_tx_in(
        conn: &mut SqliteConnection,
        entry: &LoyaltyTransaction,
    ) -> DbResult<()> {
        sqlx::query(&format!(
            "INSERT INTO loyalty_transactions ({LOYALTY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ))
        .bind(&entry.id)
        .bind(entry.customer_id)
        .bind(&entry.sale_id)
        .bind(entry.transaction_type)
        .bind(entry.points)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts or replaces a customer (seeding and tests).
    pub async fn upsert_customer(&self, customer: &Customer) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, name, loyalty_points, total_purchases_cents)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                loyalty_points = excluded.loyalty_points,
                total_purchases_cents = excluded.total_purchases_cents
            "#,
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(customer.loyalty_points)
        .bind(customer.total_purchases_cents)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
