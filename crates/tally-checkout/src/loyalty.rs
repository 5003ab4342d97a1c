//! Read-only view of a customer's loyalty standing.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CheckoutError, CheckoutResult};
use tally_core::{Caller, Capability, LoyaltyTransaction};
use tally_db::Database;

/// Ledger entries returned with a balance.
pub const HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CustomerLoyalty {
    pub customer_id: i64,
    pub name: String,
    pub loyalty_points: i64,
    pub total_purchases_cents: i64,
    /// Newest first.
    pub history: Vec<LoyaltyTransaction>,
}

#[derive(Debug, Clone)]
pub struct LoyaltyService {
    db: Database,
}

impl LoyaltyService {
    pub fn new(db: Database) -> Self {
        LoyaltyService { db }
    }

    pub async fn customer_loyalty(
        &self,
        caller: &Caller,
        customer_id: i64,
    ) -> CheckoutResult<CustomerLoyalty> {
        caller.require(Capability::ViewLoyalty)?;

        let customers = self.db.customers();
        let customer = customers
            .get_by_id(customer_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Customer", customer_id))?;
        let history = customers.loyalty_history(customer_id, HISTORY_LIMIT).await?;

        Ok(CustomerLoyalty {
            customer_id: customer.id,
            name: customer.name,
            loyalty_points: customer.loyalty_points,
            total_purchases_cents: customer.total_purchases_cents,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, seeded_db};
    use tally_core::Role;

    #[tokio::test]
    async fn test_unknown_customer() {
        let loyalty = LoyaltyService::new(seeded_db().await);
        let err = loyalty.customer_loyalty(&admin(), 404).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_inventory_manager_cannot_view_loyalty() {
        let loyalty = LoyaltyService::new(seeded_db().await);
        let caller = Caller::new(5, Role::InventoryManager, None);
        let err = loyalty.customer_loyalty(&caller, 42).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_fresh_customer_has_empty_history() {
        let loyalty = LoyaltyService::new(seeded_db().await);
        let standing = loyalty.customer_loyalty(&admin(), 42).await.unwrap();
        assert_eq!(standing.name, "Ada");
        assert_eq!(standing.loyalty_points, 0);
        assert!(standing.history.is_empty());
    }
}
