use crate::{
    api::models::points::{AdjustmentSource, PointAdjustmentCreate, PointEntryResponse},
    auth::{
        current_user::CurrentUser,
        permissions::{role, RequiresRole},
    },
    errors::Result,
    ledger::points::PointsBalance,
    AppState,
};
use axum::{extract::State, http::StatusCode, response::Json};
use tracing::instrument;

/// Get the caller's points balance
#[utoipa::path(
    get,
    path = "/points/balance",
    tag = "points",
    summary = "Points balance",
    description = "Usable balance (sum of unexpired ledger entries) alongside the cached balance stored on the user",
    responses(
        (status = 200, description = "Balance", body = PointsBalance),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, current_user), fields(user_id = %current_user.id))]
pub async fn get_balance(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<PointsBalance>> {
    Ok(Json(state.lifecycle.points_balance(current_user.id).await?))
}

/// List the caller's points ledger
#[utoipa::path(
    get,
    path = "/points/entries",
    tag = "points",
    summary = "Points history",
    responses(
        (status = 200, description = "Ledger entries, newest first", body = [PointEntryResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, current_user), fields(user_id = %current_user.id))]
pub async fn list_entries(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<PointEntryResponse>>> {
    let entries = state.lifecycle.point_entries(current_user.id).await?;
    Ok(Json(entries.into_iter().map(PointEntryResponse::from).collect()))
}

/// Grant or deduct points
#[utoipa::path(
    post,
    path = "/points/adjustments",
    tag = "points",
    summary = "Adjust a user's points",
    description = "Append a REFERRAL_REWARD or ADMIN_ADJUSTMENT entry. Positive entries expire after the configured validity (ADMIN role required).",
    request_body = PointAdjustmentCreate,
    responses(
        (status = 201, description = "Entry recorded", body = PointEntryResponse),
        (status = 400, description = "Zero delta, or deduction larger than the usable balance"),
        (status = 403, description = "Requires ADMIN role"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("X-EventHub-User" = [])
    )
)]
#[instrument(skip(state, admin, data), fields(user_id = %admin.id, target = %data.user_id, delta = data.delta))]
pub async fn create_adjustment(
    State(state): State<AppState>,
    admin: RequiresRole<role::Admin>,
    Json(data): Json<PointAdjustmentCreate>,
) -> Result<(StatusCode, Json<PointEntryResponse>)> {
    let source = data.source.unwrap_or(AdjustmentSource::AdminAdjustment);
    let entry = state
        .lifecycle
        .adjust_points(data.user_id, data.delta, source.into())
        .await?;
    Ok((StatusCode::CREATED, Json(PointEntryResponse::from(entry))))
}
