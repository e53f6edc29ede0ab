//! Rejects banned clients and reports failed authentications.
//!
//! Wrap any router with [`crate::guard`] (or layer
//! [`ban_guard_middleware`] directly). A request from a banned address gets
//! 403 without reaching the inner service. Otherwise the response decides:
//! a status listed in the [`FailurePolicy`](ipbanner_core::FailurePolicy),
//! or an [`AuthFailure`] response extension, reports a failure for the
//! client address.

use std::net::IpAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// Response extension a handler sets to flag a failed authentication
/// regardless of the status code it returns.
///
/// ```ignore
/// (StatusCode::OK, Extension(AuthFailure), "try again")
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AuthFailure;

/// Extracts the client IP from the request.
fn extract_ip(req: &Request) -> Option<IpAddr> {
    // X-Forwarded-For takes priority (reverse proxy)
    if let Some(xff) = req.headers().get("x-forwarded-for")
        && let Ok(s) = xff.to_str()
        && let Some(first) = s.split(',').next()
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return Some(ip);
    }

    // Fallback to ConnectInfo (direct connection)
    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip())
}

/// Ban-guard middleware. Returns 403 for banned addresses.
///
/// Requests without a resolvable client address pass through untouched.
pub async fn ban_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(address) = extract_ip(&req).map(|ip| ip.to_string()) else {
        return Ok(next.run(req).await);
    };

    if state.is_banned(&address) {
        tracing::debug!(
            %address,
            method = %req.method(),
            uri = %req.uri(),
            "Reject request from banned address"
        );
        return Err(ApiError::Banned);
    }

    let response = next.run(req).await;

    let flagged = response.extensions().get::<AuthFailure>().is_some();
    if state.policy().is_failure(response.status().as_u16(), flagged) {
        state.report_failure(&address);
    }

    Ok(response)
}
