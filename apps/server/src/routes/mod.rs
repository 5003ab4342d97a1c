//! Route handlers, one module per resource.

pub mod customers;
pub mod health;
pub mod inventory;
pub mod sales;

use axum::Router;

use crate::AppState;

/// Everything mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(sales::router())
        .merge(inventory::router())
        .merge(customers::router())
}
