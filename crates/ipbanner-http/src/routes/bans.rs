//! Ban queries, explicit bans and failure reports.

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::BanStatus;

fn checked(address: String) -> Result<String, ApiError> {
    if address.trim().is_empty() {
        return Err(ApiError::BadRequest("address must not be empty".to_owned()));
    }
    Ok(address)
}

/// Is the address currently banned?
pub async fn ban_status(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BanStatus>, ApiError> {
    let address = checked(address)?;
    let banned = state.is_banned(&address);
    Ok(Json(BanStatus { address, banned }))
}

/// Ban the address now, bypassing the failure threshold.
pub async fn ban_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<StatusCode, ApiError> {
    let address = checked(address)?;
    state.ban(&address);
    Ok(StatusCode::NO_CONTENT)
}

/// Report one failed authentication for the address.
pub async fn report_failure(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<StatusCode, ApiError> {
    let address = checked(address)?;
    state.report_failure(&address);
    Ok(StatusCode::ACCEPTED)
}
