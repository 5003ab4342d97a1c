//! # Sale Repository
//!
//! Database operations for sales and sale items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. COMMIT (one transaction, driven by tally-checkout)                 │
//! │     └── insert_sale_in()  → Sale { payment_status: completed }         │
//! │     └── insert_items_in() → SaleItem × n, prices snapshotted           │
//! │                                                                         │
//! │  2. (OPTIONAL) REFUND                                                  │
//! │     └── mark_refunded_in() → Sale { payment_status: refunded }         │
//! │         conditional on status = completed, so it happens at most once  │
//! │                                                                         │
//! │  Totals, items and sale number never change after commit.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use tally_core::{CoreError, Sale, SaleDetails, SaleItem};

const SALE_COLUMNS: &str = "id, sale_number, branch_id, customer_id, cashier_id, \
     subtotal_cents, tax_cents, discount_cents, discount_bps, total_cents, points_earned, \
     payment_method, payment_status, notes, refund_reason, created_at, refunded_at";

const ITEM_COLUMNS: &str = "id, sale_id, product_id, product_name, quantity, unit_price_cents, \
     tax_rate_bps, line_total_cents, tax_cents, discount_cents, line_no";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets a sale by its human-readable number.
    pub async fn get_by_number(&self, sale_number: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE sale_number = ?1"
        ))
        .bind(sale_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets all items for a sale in cart order.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY line_no"
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Gets a sale together with its items.
    pub async fn get_details(&self, id: &str) -> DbResult<Option<SaleDetails>> {
        let Some(sale) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let items = self.get_items(&sale.id).await?;
        Ok(Some(SaleDetails { sale, items }))
    }

    /// Gets a sale inside the caller's transaction.
    pub async fn get_by_id_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sale)
    }

    /// Gets a sale's items inside the caller's transaction.
    pub async fn get_items_in(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY line_no"
        ))
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Inserts a sale header.
    pub async fn insert_sale_in(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, sale_number = %sale.sale_number, "Inserting sale");

        sqlx::query(&format!(
            r#"
            INSERT INTO sales ({SALE_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#
        ))
        .bind(&sale.id)
        .bind(&sale.sale_number)
        .bind(sale.branch_id)
        .bind(sale.customer_id)
        .bind(sale.cashier_id)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.discount_cents)
        .bind(sale.discount_bps)
        .bind(sale.total_cents)
        .bind(sale.points_earned)
        .bind(sale.payment_method)
        .bind(sale.payment_status)
        .bind(&sale.notes)
        .bind(&sale.refund_reason)
        .bind(sale.created_at)
        .bind(sale.refunded_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts sale items.
    ///
    /// ## Snapshot Pattern
    /// Product name, price and tax rate are copied onto the item, so the
    /// sale reads the same after the catalog changes.
    pub async fn insert_items_in(conn: &mut SqliteConnection, items: &[SaleItem]) -> DbResult<()> {
        for item in items {
            sqlx::query(&format!(
                r#"
                INSERT INTO sale_items ({ITEM_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#
            ))
            .bind(&item.id)
            .bind(&item.sale_id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.tax_rate_bps)
            .bind(item.line_total_cents)
            .bind(item.tax_cents)
            .bind(item.discount_cents)
            .bind(item.line_no)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Moves a sale from completed to refunded and returns it.
    ///
    /// The status check and the change are one statement. `REFUNDED: <reason>`
    /// is appended to the notes.
    ///
    /// ## Errors
    /// - `SaleNotFound` when no sale has this ID
    /// - `AlreadyRefunded` when the sale is not in completed state
    pub async fn mark_refunded_in(
        conn: &mut SqliteConnection,
        sale_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Sale> {
        let updated = sqlx::query_as::<_, Sale>(&format!(
            r#"
            UPDATE sales SET
                payment_status = 'refunded',
                refund_reason = ?2,
                refunded_at = ?3,
                notes = CASE
                    WHEN notes IS NULL OR notes = '' THEN 'REFUNDED: ' || ?2
                    ELSE notes || char(10) || 'REFUNDED: ' || ?2
                END
            WHERE id = ?1 AND payment_status = 'completed'
            RETURNING {SALE_COLUMNS}
            "#
        ))
        .bind(sale_id)
        .bind(reason)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(sale) = updated {
            debug!(sale_id, sale_number = %sale.sale_number, "Sale marked refunded");
            return Ok(sale);
        }

        match Self::get_by_id_in(conn, sale_id).await? {
            Some(sale) => Err(CoreError::AlreadyRefunded {
                sale_number: sale.sale_number,
            }
            .into()),
            None => Err(CoreError::SaleNotFound(sale_id.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::testing::seeded_db;
    use tally_core::{PaymentMethod, PaymentStatus};

    fn sale(id: &str, number: &str) -> Sale {
        Sale {
            id: id.to_string(),
            sale_number: number.to_string(),
            branch_id: 1,
            customer_id: Some(42),
            cashier_id: 9,
            subtotal_cents: 3000,
            tax_cents: 300,
            discount_cents: 300,
            discount_bps: 1000,
            total_cents: 3000,
            points_earned: 30,
            payment_method: PaymentMethod::Card,
            payment_status: PaymentStatus::Completed,
            notes: None,
            refund_reason: None,
            created_at: Utc::now(),
            refunded_at: None,
        }
    }

    fn item(sale_id: &str, line_no: i64) -> SaleItem {
        SaleItem {
            id: format!("{sale_id}-item-{line_no}"),
            sale_id: sale_id.to_string(),
            product_id: 7,
            product_name: "Widget".to_string(),
            quantity: 3,
            unit_price_cents: 1000,
            tax_rate_bps: 1000,
            line_total_cents: 3000,
            tax_cents: 300,
            discount_cents: 300,
            line_no,
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let db = seeded_db().await;

        let mut tx = db.begin().await.unwrap();
        SaleRepository::insert_sale_in(&mut tx, &sale("s1", "MAIN-000001"))
            .await
            .unwrap();
        SaleRepository::insert_items_in(&mut tx, &[item("s1", 2), item("s1", 1)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let details = db.sales().get_details("s1").await.unwrap().unwrap();
        assert_eq!(details.sale.sale_number, "MAIN-000001");
        assert_eq!(details.sale.payment_method, PaymentMethod::Card);
        assert_eq!(details.sale.discount_bps, 1000);
        assert_eq!(details.items.len(), 2);
        assert_eq!(details.items[0].line_no, 1);

        let by_number = db.sales().get_by_number("MAIN-000001").await.unwrap();
        assert_eq!(by_number.map(|s| s.id), Some("s1".to_string()));
        assert!(db.sales().get_details("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refund_happens_once() {
        let db = seeded_db().await;

        let mut tx = db.begin().await.unwrap();
        SaleRepository::insert_sale_in(&mut tx, &sale("s1", "MAIN-000001"))
            .await
            .unwrap();
        let refunded = SaleRepository::mark_refunded_in(&mut tx, "s1", "damaged", Utc::now())
            .await
            .unwrap();
        assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
        assert_eq!(refunded.refund_reason.as_deref(), Some("damaged"));
        assert_eq!(refunded.notes.as_deref(), Some("REFUNDED: damaged"));
        assert!(refunded.refunded_at.is_some());

        let err = SaleRepository::mark_refunded_in(&mut tx, "s1", "again", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Rejected(CoreError::AlreadyRefunded { ref sale_number }) if sale_number == "MAIN-000001"
        ));

        let err = SaleRepository::mark_refunded_in(&mut tx, "nope", "x", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::SaleNotFound(_))));
    }

    #[tokio::test]
    async fn test_refund_note_is_appended() {
        let db = seeded_db().await;
        let mut with_notes = sale("s2", "MAIN-000002");
        with_notes.notes = Some("gift".to_string());

        let mut tx = db.begin().await.unwrap();
        SaleRepository::insert_sale_in(&mut tx, &with_notes).await.unwrap();
        let refunded = SaleRepository::mark_refunded_in(&mut tx, "s2", "wrong size", Utc::now())
            .await
            .unwrap();

        assert_eq!(refunded.notes.as_deref(), Some("gift\nREFUNDED: wrong size"));
    }
}
