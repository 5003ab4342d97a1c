//! Sale commit, lookup, and refund.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthCaller;
use crate::error::ApiResult;
use crate::AppState;
use tally_checkout::{CommitSaleRequest, RefundRequest};
use tally_core::{Sale, SaleDetails, SaleReceipt};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sales", post(commit_sale))
        .route("/sales/{sale_id}", get(get_sale))
        .route("/sales/{sale_id}/refund", post(refund_sale))
}

/// Receipt fields at the top level, plus whether this was a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    #[serde(flatten)]
    pub receipt: SaleReceipt,
    pub replayed: bool,
}

/// `201 Created` for a new sale, `200 OK` when the key already committed.
async fn commit_sale(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    payload: Result<Json<CommitSaleRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CommitResponse>)> {
    let Json(request) = payload?;
    let outcome = state.checkout.commit_sale(&caller, request).await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(CommitResponse {
            receipt: outcome.receipt,
            replayed: outcome.replayed,
        }),
    ))
}

async fn get_sale(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    sale_id: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<SaleDetails>> {
    let Path(sale_id) = sale_id?;
    Ok(Json(state.checkout.get_sale(&caller, &sale_id).await?))
}

async fn refund_sale(
    State(state): State<AppState>,
    AuthCaller(caller): AuthCaller,
    sale_id: Result<Path<String>, PathRejection>,
    payload: Result<Json<RefundRequest>, JsonRejection>,
) -> ApiResult<Json<Sale>> {
    let Path(sale_id) = sale_id?;
    let Json(request) = payload?;
    Ok(Json(state.checkout.refund_sale(&caller, &sale_id, request).await?))
}
