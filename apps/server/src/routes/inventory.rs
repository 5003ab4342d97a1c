//! Stock lookups and back-office stock changes.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::AuthCaller;
use crate::error::ApiResult;
use crate::AppState;
use tally_checkout::{
    AdjustStockRequest, ReceiveStockRequest, StockReport, TransferOutcome, TransferStockRequest,
};
use tally_core::{LowStockItem, StockMovement};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/inventory/low-stock", get(low_stock))
        .route("/inventory/receive", post(receive))
        .route("/inventory/adjust", post(adjust))
        .route("/inventory/transfer", post(transfer))
        .route("/inventory/{product_id}/{branch_id}", get(stock))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockQuery {
    pub branch_id: Option<i64>,
}

async fn low_stock(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    query: Result<Query<LowStockQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<LowStockItem>>> {
    let Query(query) = query?;
    Ok(Json(state.inventory.low_stock(&caller, query.branch_id).await?))
}

async fn stock(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<Json<StockReport>> {
    let Path((product_id, branch_id)) = ids?;
    Ok(Json(state.inventory.stock(&caller, product_id, branch_id).await?))
}

async fn receive(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    payload: Result<Json<ReceiveStockRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StockMovement>)> {
    let Json(request) = payload?;
    let movement = state.inventory.receive(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn adjust(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    payload: Result<Json<AdjustStockRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StockMovement>)> {
    let Json(request) = payload?;
    let movement = state.inventory.adjust(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

async fn transfer(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    payload: Result<Json<TransferStockRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TransferOutcome>)> {
    let Json(request) = payload?;
    let outcome = state.inventory.transfer(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
