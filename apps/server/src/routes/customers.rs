use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::auth::AuthCaller;
use crate::error::ApiResult;
use crate::AppState;
use tally_checkout::CustomerLoyalty;

pub fn router() -> Router<AppState> {
    Router::new().route("/customers/{customer_id}/loyalty", get(customer_loyalty))
}

async fn customer_loyalty(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    customer_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<CustomerLoyalty>> {
    let Path(customer_id) = customer_id?;
    Ok(Json(state.loyalty.customer_loyalty(&caller, customer_id).await?))
}
