//! # Inventory Service
//!
//! Stock lookups and back-office stock changes, with the caller's
//! capability and branch scope checked before the ledger is touched.
//!
//! | Operation   | Capability        | Branch checked        |
//! |-------------|-------------------|-----------------------|
//! | `stock`     | `ViewInventory`   | the requested branch  |
//! | `low_stock` | `ViewInventory`   | filter, or own branch |
//! | `receive`   | `ManageInventory` | receiving branch      |
//! | `adjust`    | `ManageInventory` | counted branch        |
//! | `transfer`  | `ManageInventory` | both branches         |

use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::error::{CheckoutError, CheckoutResult};
use crate::retry::retry_busy;
use crate::settings::CheckoutSettings;
use tally_core::validation::validate_notes;
use tally_core::{Caller, Capability, LowStockItem, Role, StockMovement};
use tally_db::Database;

/// Movements shown with a stock lookup.
pub const RECENT_MOVEMENTS: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveStockRequest {
    pub product_id: i64,
    pub branch_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost_cents: Option<i64>,
    /// Delivery note or PO number.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct AdjustStockRequest {
    pub product_id: i64,
    pub branch_id: i64,
    /// Physical count. Stock is set to this.
    pub counted_quantity: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransferStockRequest {
    pub product_id: i64,
    pub from_branch_id: i64,
    pub to_branch_id: i64,
    pub quantity: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Stock at one branch with its latest movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockReport {
    pub product_id: i64,
    pub branch_id: i64,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub available_stock: i64,
    pub recent_movements: Vec<StockMovement>,
}

/// Both legs of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub out_movement: StockMovement,
    pub in_movement: StockMovement,
}

#[derive(Debug, Clone)]
pub struct InventoryService {
    db: Database,
    settings: CheckoutSettings,
}

impl InventoryService {
    pub fn new(db: Database, settings: CheckoutSettings) -> Self {
        InventoryService { db, settings }
    }

    /// Stock level and recent movements for a product at a branch.
    ///
    /// A product that was never stocked at the branch reports zeros, as
    /// long as both exist.
    pub async fn stock(
        &self,
        caller: &Caller,
        product_id: i64,
        branch_id: i64,
    ) -> CheckoutResult<StockReport> {
        caller.require_at(Capability::ViewInventory, branch_id)?;

        let ledger = self.db.inventory();
        let (current_stock, reserved_stock) = match ledger.stock_level(product_id, branch_id).await? {
            Some(level) => (level.current_stock, level.reserved_stock),
            None => {
                let catalog = self.db.catalog();
                if catalog.get_product(product_id).await?.is_none() {
                    return Err(CheckoutError::not_found("Product", product_id));
                }
                if catalog.get_branch(branch_id).await?.is_none() {
                    return Err(CheckoutError::not_found("Branch", branch_id));
                }
                (0, 0)
            }
        };

        let recent_movements = ledger
            .movements_for(product_id, branch_id, RECENT_MOVEMENTS)
            .await?;

        Ok(StockReport {
            product_id,
            branch_id,
            current_stock,
            reserved_stock,
            available_stock: current_stock - reserved_stock,
            recent_movements,
        })
    }

    /// Products at or below their reorder level.
    ///
    /// Branch-bound callers only ever see their own branch.
    pub async fn low_stock(
        &self,
        caller: &Caller,
        branch_id: Option<i64>,
    ) -> CheckoutResult<Vec<LowStockItem>> {
        caller.require(Capability::ViewInventory)?;

        let scope = match branch_id {
            Some(id) => {
                caller.require_branch(id)?;
                Some(id)
            }
            None if caller.role == Role::Admin => None,
            None => caller.branch_id,
        };

        Ok(self.db.inventory().low_stock(scope).await?)
    }

    pub async fn receive(
        &self,
        caller: &Caller,
        request: ReceiveStockRequest,
    ) -> CheckoutResult<StockMovement> {
        caller.require_at(Capability::ManageInventory, request.branch_id)?;
        validate_notes(request.notes.as_deref())?;

        let ledger = &self.db.inventory();
        let request = &request;
        let movement = retry_busy(&self.settings, "receive_stock", move || async move {
            ledger.receive(
                request.product_id,
                request.branch_id,
                request.quantity,
                request.unit_cost_cents,
                request.reference.as_deref(),
                request.notes.as_deref(),
                caller.user_id,
            )
            .await
            .map_err(CheckoutError::from)
        })
        .await?;

        info!(
            product_id = request.product_id,
            branch_id = request.branch_id,
            quantity = request.quantity,
            reference = %movement.reference,
            "Stock received"
        );
        Ok(movement)
    }

    pub async fn adjust(
        &self,
        caller: &Caller,
        request: AdjustStockRequest,
    ) -> CheckoutResult<StockMovement> {
        caller.require_at(Capability::ManageInventory, request.branch_id)?;
        validate_notes(request.notes.as_deref())?;

        let ledger = &self.db.inventory();
        let request = &request;
        let movement = retry_busy(&self.settings, "adjust_stock", move || async move {
            ledger.adjust_to(
                request.product_id,
                request.branch_id,
                request.counted_quantity,
                request.notes.as_deref(),
                caller.user_id,
            )
            .await
            .map_err(CheckoutError::from)
        })
        .await?;

        info!(
            product_id = request.product_id,
            branch_id = request.branch_id,
            delta = movement.quantity,
            "Stock adjusted"
        );
        Ok(movement)
    }

    pub async fn transfer(
        &self,
        caller: &Caller,
        request: TransferStockRequest,
    ) -> CheckoutResult<TransferOutcome> {
        caller.require_at(Capability::ManageInventory, request.from_branch_id)?;
        caller.require_branch(request.to_branch_id)?;
        validate_notes(request.notes.as_deref())?;

        let ledger = &self.db.inventory();
        let request = &request;
        let legs = retry_busy(&self.settings, "transfer_stock", move || async move {
            ledger.transfer(
                request.product_id,
                request.from_branch_id,
                request.to_branch_id,
                request.quantity,
                request.notes.as_deref(),
                caller.user_id,
            )
            .await
            .map_err(CheckoutError::from)
        })
        .await?;

        info!(
            product_id = request.product_id,
            from_branch_id = request.from_branch_id,
            to_branch_id = request.to_branch_id,
            quantity = request.quantity,
            "Stock transferred"
        );
        let (out_movement, in_movement) = legs;
        Ok(TransferOutcome {
            out_movement,
            in_movement,
        })
    }
}
