//! # Stock Ledger
//!
//! Per-(product, branch) stock levels plus the append-only movement log.
//!
//! ## Conditional Decrement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cart: product 7 × 2, product 8 × 1, product 7 × 3                      │
//! │       │                                                                 │
//! │       ▼  aggregate by product                                           │
//! │  { 7: 5, 8: 1 }                                                         │
//! │       │                                                                 │
//! │       ▼  per product, in id order                                       │
//! │  UPDATE inventory                                                       │
//! │     SET current_stock = current_stock - 5                               │
//! │   WHERE product_id = 7 AND branch_id = 1                                │
//! │     AND current_stock - reserved_stock >= 5                             │
//! │       │                                                                 │
//! │       ├── 1 row  → decremented                                          │
//! │       └── 0 rows → InsufficientStock, caller rolls the transaction back │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  One OUT movement per cart line (quantity negative)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The check and the decrement are one statement, so two tills can never
//! both sell the last unit. The `CHECK (current_stock >= 0)` column
//! constraint backs it up.
//!
//! ## Lock Order
//! Every write path here starts with a write statement. The SQLite write
//! lock is held from the first statement to COMMIT, so read-then-write
//! races inside a transaction cannot happen.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tally_core::{
    CoreError, InventoryLevel, LowStockItem, MovementType, StockMovement, ValidationError,
};

const MOVEMENT_COLUMNS: &str = "id, product_id, branch_id, movement_type, quantity, \
     unit_cost_cents, reference, notes, sale_item_id, created_by, created_at";

/// One quantity to take from or return to a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: i64,
    pub quantity: i64,
    /// Sale item this line belongs to, for sale and refund movements.
    pub sale_item_id: Option<String>,
}

/// Repository for stock levels and movements.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    /// Creates a new StockLedger.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current level for a product at a branch, if it has ever moved there.
    pub async fn stock_level(
        &self,
        product_id: i64,
        branch_id: i64,
    ) -> DbResult<Option<InventoryLevel>> {
        let level = sqlx::query_as::<_, InventoryLevel>(
            r#"
            SELECT product_id, branch_id, current_stock, reserved_stock, updated_at
            FROM inventory
            WHERE product_id = ?1 AND branch_id = ?2
            "#,
        )
        .bind(product_id)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Movement history for a product at a branch, newest first.
    pub async fn movements_for(
        &self,
        product_id: i64,
        branch_id: i64,
        limit: i64,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE product_id = ?1 AND branch_id = ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3
            "#
        ))
        .bind(product_id)
        .bind(branch_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// All movements carrying a business reference, in insertion order.
    pub async fn movements_by_reference(&self, reference: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE reference = ?1 ORDER BY rowid"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Active products at or below their reorder level.
    ///
    /// `None` reports every branch.
    pub async fn low_stock(&self, branch_id: Option<i64>) -> DbResult<Vec<LowStockItem>> {
        let items = sqlx::query_as::<_, LowStockItem>(
            r#"
            SELECT
                i.product_id,
                p.name AS product_name,
                i.branch_id,
                i.current_stock,
                p.reorder_level
            FROM inventory i
            JOIN products p ON p.id = i.product_id
            WHERE p.is_active = 1
              AND i.current_stock <= p.reorder_level
              AND (?1 IS NULL OR i.branch_id = ?1)
            ORDER BY i.branch_id, i.current_stock, i.product_id
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    // =========================================================================
    // Sale path (joins the caller's transaction)
    // =========================================================================

    /// Takes every line's quantity out of `branch_id`, or nothing at all.
    ///
    /// Lines for the same product are summed before the availability check.
    /// On `InsufficientStock` earlier decrements in this call are still in
    /// the transaction; the caller must roll back.
    pub async fn reserve_and_decrement_in(
        conn: &mut SqliteConnection,
        branch_id: i64,
        lines: &[StockLine],
        reference: &str,
        created_by: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockMovement>> {
        let mut wanted: BTreeMap<i64, i64> = BTreeMap::new();
        for line in lines {
            let total = wanted.entry(line.product_id).or_insert(0);
            *total = total
                .checked_add(line.quantity)
                .ok_or_else(|| CoreError::from(ValidationError::overflow("quantity")))?;
        }

        for (&product_id, &quantity) in &wanted {
            let result = sqlx::query(
                r#"
                UPDATE inventory
                SET current_stock = current_stock - ?1, updated_at = ?2
                WHERE product_id = ?3 AND branch_id = ?4
                  AND current_stock - reserved_stock >= ?1
                "#,
            )
            .bind(quantity)
            .bind(now)
            .bind(product_id)
            .bind(branch_id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                let available = Self::available_in(conn, product_id, branch_id).await?;
                debug!(product_id, branch_id, available, requested = quantity, "Stock check failed");
                return Err(CoreError::InsufficientStock {
                    product_id,
                    branch_id,
                    available,
                    requested: quantity,
                }
                .into());
            }
        }

        let mut movements = Vec::with_capacity(lines.len());
        for line in lines {
            let movement = StockMovement {
                id: Uuid::new_v4().to_string(),
                product_id: line.product_id,
                branch_id,
                movement_type: MovementType::Out,
                quantity: -line.quantity,
                unit_cost_cents: None,
                reference: reference.to_string(),
                notes: None,
                sale_item_id: line.sale_item_id.clone(),
                created_by,
                created_at: now,
            };
            Self::insert_movement_in(conn, &movement).await?;
            movements.push(movement);
        }

        Ok(movements)
    }

    /// Puts every line's quantity back into `branch_id`.
    ///
    /// Creates the inventory row if it has disappeared from the branch.
    pub async fn restore_in(
        conn: &mut SqliteConnection,
        branch_id: i64,
        lines: &[StockLine],
        reference: &str,
        created_by: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<StockMovement>> {
        let mut movements = Vec::with_capacity(lines.len());

        for line in lines {
            Self::add_stock_in(conn, line.product_id, branch_id, line.quantity, now).await?;

            let movement = StockMovement {
                id: Uuid::new_v4().to_string(),
                product_id: line.product_id,
                branch_id,
                movement_type: MovementType::In,
                quantity: line.quantity,
                unit_cost_cents: None,
                reference: reference.to_string(),
                notes: None,
                sale_item_id: line.sale_item_id.clone(),
                created_by,
                created_at: now,
            };
            Self::insert_movement_in(conn, &movement).await?;
            movements.push(movement);
        }

        Ok(movements)
    }

    // =========================================================================
    // Stock management (owns its transaction)
    // =========================================================================

    /// [`Self::reserve_and_decrement_in`] in its own transaction.
    pub async fn reserve_and_decrement(
        &self,
        branch_id: i64,
        lines: &[StockLine],
        reference: &str,
        created_by: i64,
    ) -> DbResult<Vec<StockMovement>> {
        let mut tx = self.pool.begin().await?;
        let movements =
            Self::reserve_and_decrement_in(&mut tx, branch_id, lines, reference, created_by, Utc::now())
                .await?;
        tx.commit().await?;
        Ok(movements)
    }

    /// [`Self::restore_in`] in its own transaction.
    pub async fn restore(
        &self,
        branch_id: i64,
        lines: &[StockLine],
        reference: &str,
        created_by: i64,
    ) -> DbResult<Vec<StockMovement>> {
        let mut tx = self.pool.begin().await?;
        let movements =
            Self::restore_in(&mut tx, branch_id, lines, reference, created_by, Utc::now()).await?;
        tx.commit().await?;
        Ok(movements)
    }

    /// Records goods received at a branch.
    ///
    /// ## Arguments
    /// * `reference` - Delivery note or PO number; generated when absent
    pub async fn receive(
        &self,
        product_id: i64,
        branch_id: i64,
        quantity: i64,
        unit_cost_cents: Option<i64>,
        reference: Option<&str>,
        notes: Option<&str>,
        created_by: i64,
    ) -> DbResult<StockMovement> {
        if quantity <= 0 {
            return Err(CoreError::from(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            })
            .into());
        }
        if matches!(unit_cost_cents, Some(c) if c < 0) {
            return Err(CoreError::from(ValidationError::out_of_range(
                "unit_cost",
                0,
                i64::MAX,
            ))
            .into());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        Self::ensure_level_in(&mut tx, product_id, branch_id, now).await?;
        Self::add_stock_in(&mut tx, product_id, branch_id, quantity, now).await?;

        let movement = StockMovement {
            id: Uuid::new_v4().to_string(),
            product_id,
            branch_id,
            movement_type: MovementType::In,
            quantity,
            unit_cost_cents,
            reference: reference
                .map(str::to_string)
                .unwrap_or_else(|| format!("RECEIVE-{}", Uuid::new_v4())),
            notes: notes.map(str::to_string),
            sale_item_id: None,
            created_by,
            created_at: now,
        };
        Self::insert_movement_in(&mut tx, &movement).await?;

        tx.commit().await?;

        info!(product_id, branch_id, quantity, "Stock received");
        Ok(movement)
    }

    /// Sets the counted stock for a product at a branch.
    ///
    /// Always writes an ADJUSTMENT movement carrying the signed delta, even
    /// when the count matches. A count below reserved stock is refused.
    pub async fn adjust_to(
        &self,
        product_id: i64,
        branch_id: i64,
        counted: i64,
        notes: Option<&str>,
        created_by: i64,
    ) -> DbResult<StockMovement> {
        if counted < 0 {
            return Err(
                CoreError::from(ValidationError::out_of_range("count", 0, i64::MAX)).into(),
            );
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let level = Self::ensure_level_in(&mut tx, product_id, branch_id, now).await?;
        if counted < level.reserved_stock {
            return Err(CoreError::from(ValidationError::out_of_range(
                "count",
                level.reserved_stock,
                i64::MAX,
            ))
            .into());
        }

        let delta = counted - level.current_stock;

        sqlx::query(
            r#"
            UPDATE inventory SET current_stock = ?1, updated_at = ?2
            WHERE product_id = ?3 AND branch_id = ?4
            "#,
        )
        .bind(counted)
        .bind(now)
        .bind(product_id)
        .bind(branch_id)
        .execute(&mut *tx)
        .await?;

        let movement = StockMovement {
            id: Uuid::new_v4().to_string(),
            product_id,
            branch_id,
            movement_type: MovementType::Adjustment,
            quantity: delta,
            unit_cost_cents: None,
            reference: format!("ADJUST-{}", Uuid::new_v4()),
            notes: notes.map(str::to_string),
            sale_item_id: None,
            created_by,
            created_at: now,
        };
        Self::insert_movement_in(&mut tx, &movement).await?;

        tx.commit().await?;

        info!(product_id, branch_id, counted, delta, "Stock adjusted");
        Ok(movement)
    }

    /// Moves stock between two branches.
    ///
    /// Writes two TRANSFER movements sharing one reference: negative at the
    /// source, positive at the destination.
    pub async fn transfer(
        &self,
        product_id: i64,
        from_branch_id: i64,
        to_branch_id: i64,
        quantity: i64,
        notes: Option<&str>,
        created_by: i64,
    ) -> DbResult<(StockMovement, StockMovement)> {
        if quantity <= 0 {
            return Err(CoreError::from(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            })
            .into());
        }
        if from_branch_id == to_branch_id {
            return Err(CoreError::from(ValidationError::InvalidFormat {
                field: "to_branch_id".to_string(),
                reason: "must differ from the source branch".to_string(),
            })
            .into());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        Self::ensure_level_in(&mut tx, product_id, from_branch_id, now).await?;
        Self::ensure_level_in(&mut tx, product_id, to_branch_id, now).await?;

        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET current_stock = current_stock - ?1, updated_at = ?2
            WHERE product_id = ?3 AND branch_id = ?4
              AND current_stock - reserved_stock >= ?1
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(product_id)
        .bind(from_branch_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let available = Self::available_in(&mut tx, product_id, from_branch_id).await?;
            return Err(CoreError::InsufficientStock {
                product_id,
                branch_id: from_branch_id,
                available,
                requested: quantity,
            }
            .into());
        }

        Self::add_stock_in(&mut tx, product_id, to_branch_id, quantity, now).await?;

        let reference = format!("TRANSFER-{}", Uuid::new_v4());
        let leg = |branch_id: i64, qty: i64| StockMovement {
            id: Uuid::new_v4().to_string(),
            product_id,
            branch_id,
            movement_type: MovementType::Transfer,
            quantity: qty,
            unit_cost_cents: None,
            reference: reference.clone(),
            notes: notes.map(str::to_string),
            sale_item_id: None,
            created_by,
            created_at: now,
        };
        let out_leg = leg(from_branch_id, -quantity);
        let in_leg = leg(to_branch_id, quantity);

        Self::insert_movement_in(&mut tx, &out_leg).await?;
        Self::insert_movement_in(&mut tx, &in_leg).await?;

        tx.commit().await?;

        info!(product_id, from_branch_id, to_branch_id, quantity, "Stock transferred");
        Ok((out_leg, in_leg))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Creates the level row if missing and returns it.
    ///
    /// This is a write, so it also takes the write lock for the transaction.
    async fn ensure_level_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        branch_id: i64,
        now: DateTime<Utc>,
    ) -> DbResult<InventoryLevel> {
        let result = sqlx::query_as::<_, InventoryLevel>(
            r#"
            INSERT INTO inventory (product_id, branch_id, current_stock, reserved_stock, updated_at)
            VALUES (?1, ?2, 0, 0, ?3)
            ON CONFLICT(product_id, branch_id) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING product_id, branch_id, current_stock, reserved_stock, updated_at
            "#,
        )
        .bind(product_id)
        .bind(branch_id)
        .bind(now)
        .fetch_one(&mut *conn)
        .await;

        match result {
            Ok(level) => Ok(level),
            Err(e) => match DbError::from(e) {
                DbError::ForeignKeyViolation { .. } => {
                    Err(Self::missing_reference_in(conn, product_id, branch_id).await)
                }
                other => Err(other),
            },
        }
    }

    async fn add_stock_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        branch_id: i64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, branch_id, current_stock, reserved_stock, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT(product_id, branch_id) DO UPDATE SET
                current_stock = current_stock + excluded.current_stock,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(product_id)
        .bind(branch_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn available_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        branch_id: i64,
    ) -> DbResult<i64> {
        let available: Option<i64> = sqlx::query_scalar(
            "SELECT current_stock - reserved_stock FROM inventory WHERE product_id = ?1 AND branch_id = ?2",
        )
        .bind(product_id)
        .bind(branch_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(available.unwrap_or(0).max(0))
    }

    /// Works out which side of a failed inventory foreign key is missing.
    async fn missing_reference_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        branch_id: i64,
    ) -> DbError {
        let product: Result<Option<i64>, sqlx::Error> =
            sqlx::query_scalar("SELECT id FROM products WHERE id = ?1")
                .bind(product_id)
                .fetch_optional(&mut *conn)
                .await;

        match product {
            Ok(Some(_)) => CoreError::BranchNotFound(branch_id).into(),
            Ok(None) => CoreError::ProductNotFound(product_id).into(),
            Err(e) => e.into(),
        }
    }

    async fn insert_movement_in(
        conn: &mut SqliteConnection,
        movement: &StockMovement,
    ) -> DbResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO stock_movements ({MOVEMENT_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#
        ))
        .bind(&movement.id)
        .bind(movement.product_id)
        .bind(movement.branch_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.unit_cost_cents)
        .bind(&movement.reference)
        .bind(&movement.notes)
        .bind(&movement.sale_item_id)
        .bind(movement.created_by)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::seeded_db;

    fn line(product_id: i64, quantity: i64) -> StockLine {
        StockLine {
            product_id,
            quantity,
            sale_item_id: None,
        }
    }

    #[tokio::test]
    async fn test_receive_creates_level_and_movement() {
        let db = seeded_db().await;
        let ledger = db.inventory();

        let movement = ledger
            .receive(7, 1, 24, Some(400), Some("PO-1001"), None, 9)
            .await
            .unwrap();
        assert_eq!(movement.movement_type, MovementType::In);
        assert_eq!(movement.quantity, 24);
        assert_eq!(movement.reference, "PO-1001");

        let level = ledger.stock_level(7, 1).await.unwrap().unwrap();
        assert_eq!(level.current_stock, 24);
        assert_eq!(level.available_stock(), 24);

        ledger.receive(7, 1, 6, None, None, None, 9).await.unwrap();
        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 30);
    }

    #[tokio::test]
    async fn test_receive_rejects_unknown_product_and_branch() {
        let db = seeded_db().await;
        let ledger = db.inventory();

        let err = ledger.receive(999, 1, 1, None, None, None, 9).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::ProductNotFound(999))));

        let err = ledger.receive(7, 99, 1, None, None, None, 9).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::BranchNotFound(99))));

        let err = ledger.receive(7, 1, 0, None, None, None, 9).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_decrement_aggregates_lines_per_product() {
        let db = seeded_db().await;
        db.inventory().receive(7, 1, 5, None, None, None, 9).await.unwrap();
        db.inventory().receive(8, 1, 5, None, None, None, 9).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let movements = StockLedger::reserve_and_decrement_in(
            &mut tx,
            1,
            &[line(7, 2), line(8, 1), line(7, 3)],
            "SALE-test",
            9,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(movements.len(), 3);
        assert!(movements.iter().all(|m| m.quantity < 0));

        let ledger = db.inventory();
        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 0);
        assert_eq!(ledger.stock_level(8, 1).await.unwrap().unwrap().current_stock, 4);
        assert_eq!(ledger.movements_by_reference("SALE-test").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_decrement_reports_aggregate_shortfall() {
        let db = seeded_db().await;
        db.inventory().receive(7, 1, 4, None, None, None, 9).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let err = StockLedger::reserve_and_decrement_in(
            &mut tx,
            1,
            &[line(7, 2), line(7, 3)],
            "SALE-short",
            9,
            Utc::now(),
        )
        .await
        .unwrap_err();
        tx.rollback().await.unwrap();

        match err {
            DbError::Rejected(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, 4);
                assert_eq!(requested, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let level = db.inventory().stock_level(7, 1).await.unwrap().unwrap();
        assert_eq!(level.current_stock, 4);
    }

    #[tokio::test]
    async fn test_decrement_without_inventory_row_is_insufficient() {
        let db = seeded_db().await;

        let mut tx = db.begin().await.unwrap();
        let err = StockLedger::reserve_and_decrement_in(&mut tx, 2, &[line(8, 1)], "SALE-x", 9, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Rejected(CoreError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_puts_stock_back() {
        let db = seeded_db().await;
        db.inventory().receive(7, 1, 3, None, None, None, 9).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        StockLedger::reserve_and_decrement_in(&mut tx, 1, &[line(7, 3)], "SALE-r", 9, Utc::now())
            .await
            .unwrap();
        let restored =
            StockLedger::restore_in(&mut tx, 1, &[line(7, 3)], "REFUND-r", 9, Utc::now())
                .await
                .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(restored[0].movement_type, MovementType::In);
        assert_eq!(restored[0].quantity, 3);
        assert_eq!(db.inventory().stock_level(7, 1).await.unwrap().unwrap().current_stock, 3);
    }

    #[tokio::test]
    async fn test_standalone_batch_is_all_or_nothing() {
        let db = seeded_db().await;
        let ledger = db.inventory();
        ledger.receive(7, 1, 5, None, None, None, 9).await.unwrap();
        ledger.receive(8, 1, 1, None, None, None, 9).await.unwrap();

        let err = ledger
            .reserve_and_decrement(1, &[line(7, 2), line(8, 2)], "SALE-batch", 9)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Rejected(CoreError::InsufficientStock { product_id: 8, .. })
        ));
        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 5);
        assert!(ledger.movements_by_reference("SALE-batch").await.unwrap().is_empty());

        ledger
            .reserve_and_decrement(1, &[line(7, 2)], "SALE-ok", 9)
            .await
            .unwrap();
        ledger.restore(1, &[line(7, 2)], "REFUND-ok", 9).await.unwrap();
        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 5);
    }

    #[tokio::test]
    async fn test_adjust_records_signed_delta() {
        let db = seeded_db().await;
        let ledger = db.inventory();
        ledger.receive(7, 1, 10, None, None, None, 9).await.unwrap();

        let down = ledger.adjust_to(7, 1, 7, Some("shrinkage"), 9).await.unwrap();
        assert_eq!(down.quantity, -3);
        assert_eq!(down.movement_type, MovementType::Adjustment);

        let same = ledger.adjust_to(7, 1, 7, None, 9).await.unwrap();
        assert_eq!(same.quantity, 0);

        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 7);
        assert!(ledger.adjust_to(7, 1, -1, None, 9).await.is_err());
    }

    #[tokio::test]
    async fn test_adjust_refuses_count_below_reserved() {
        let db = seeded_db().await;
        db.inventory().receive(7, 1, 10, None, None, None, 9).await.unwrap();
        sqlx::query("UPDATE inventory SET reserved_stock = 4 WHERE product_id = 7 AND branch_id = 1")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.inventory().adjust_to(7, 1, 3, None, 9).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_transfer_moves_stock_between_branches() {
        let db = seeded_db().await;
        let ledger = db.inventory();
        ledger.receive(7, 1, 10, None, None, None, 9).await.unwrap();

        let (out_leg, in_leg) = ledger.transfer(7, 1, 2, 4, None, 9).await.unwrap();
        assert_eq!(out_leg.quantity, -4);
        assert_eq!(in_leg.quantity, 4);
        assert_eq!(out_leg.reference, in_leg.reference);

        assert_eq!(ledger.stock_level(7, 1).await.unwrap().unwrap().current_stock, 6);
        assert_eq!(ledger.stock_level(7, 2).await.unwrap().unwrap().current_stock, 4);

        assert!(ledger.transfer(7, 1, 1, 1, None, 9).await.is_err());
        let err = ledger.transfer(7, 1, 2, 50, None, 9).await.unwrap_err();
        assert!(matches!(err, DbError::Rejected(CoreError::InsufficientStock { .. })));
    }

    #[tokio::test]
    async fn test_low_stock_report() {
        let db = seeded_db().await;
        let ledger = db.inventory();
        ledger.receive(7, 1, 3, None, None, None, 9).await.unwrap();
        ledger.receive(8, 1, 50, None, None, None, 9).await.unwrap();
        ledger.receive(8, 2, 2, None, None, None, 9).await.unwrap();

        let all = ledger.low_stock(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let main = ledger.low_stock(Some(1)).await.unwrap();
        assert_eq!(main.len(), 1);
        assert_eq!(main[0].product_id, 7);
        assert_eq!(main[0].product_name, "Widget");
        assert_eq!(main[0].reorder_level, 5);
    }

    #[tokio::test]
    async fn test_movement_history_newest_first() {
        let db = seeded_db().await;
        let ledger = db.inventory();
        ledger.receive(7, 1, 10, None, Some("first"), None, 9).await.unwrap();
        ledger.adjust_to(7, 1, 8, None, 9).await.unwrap();

        let history = ledger.movements_for(7, 1, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].movement_type, MovementType::Adjustment);
        assert_eq!(history[1].reference, "first");
    }
}
