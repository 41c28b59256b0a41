//! Privileged role update.
//!
//! The caller authenticates with their own ID token and must already carry
//! the admin claim. The target's new claim takes effect the next time the
//! target's token is re-minted.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
    routing::post,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{AdminOnly, BearerAuth};
use crate::client::RoleUpdateRequest;
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/role", post(update_role))
        .with_state(state)
}

#[derive(Serialize)]
struct UpdateRoleResponse {
    success: bool,
}

async fn update_role(
    State(state): State<UsersState>,
    auth: BearerAuth<AdminOnly>,
    payload: Result<Json<RoleUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|e| {
        warn!(error = %e, "Malformed role update body");
        ApiError::bad_request("Invalid request body")
    })?;

    let target_uid = payload
        .target_uid
        .as_deref()
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing userId in request body"))?;

    let updated = state
        .db
        .users()
        .set_admin(target_uid, payload.is_admin)
        .await
        .db_err("Failed to update user role")?;

    if !updated {
        return Err(ApiError::not_found("User not found"));
    }

    info!(
        caller = %auth.claims.sub,
        target_uid = %target_uid,
        is_admin = payload.is_admin,
        "Updated role claim"
    );
    Ok(Json(UpdateRoleResponse { success: true }))
}
