//! # tally-server: HTTP API
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST /api/sales                          commit a cart                 │
//! │  GET  /api/sales/{sale_id}                sale header + items           │
//! │  POST /api/sales/{sale_id}/refund         refund a completed sale       │
//! │                                                                         │
//! │  GET  /api/inventory/low-stock            at or below reorder level     │
//! │  GET  /api/inventory/{product}/{branch}   stock + recent movements      │
//! │  POST /api/inventory/receive              IN movement                   │
//! │  POST /api/inventory/adjust               ADJUSTMENT movement           │
//! │  POST /api/inventory/transfer             TRANSFER movements            │
//! │                                                                         │
//! │  GET  /api/customers/{id}/loyalty         balance + history             │
//! │  GET  /health                             database health               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use axum::Router;
use tower_http::trace::TraceLayer;

use tally_checkout::{CheckoutService, CheckoutSettings, InventoryService, LoyaltyService};
use tally_db::Database;

pub use auth::AuthCaller;
pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, ApiResult, ErrorCode};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub checkout: CheckoutService,
    pub inventory: InventoryService,
    pub loyalty: LoyaltyService,
}

impl AppState {
    pub fn new(db: Database, settings: CheckoutSettings) -> Self {
        AppState {
            checkout: CheckoutService::new(db.clone(), settings.clone()),
            inventory: InventoryService::new(db.clone(), settings),
            loyalty: LoyaltyService::new(db.clone()),
            db,
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::health::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
