//! Session validation for servers that only know a user id and a device
//! session id.

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ResultExt};
use crate::client::SessionRepository;
use crate::db::Database;

#[derive(Clone)]
pub struct SessionsState {
    pub db: Database,
}

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/validate", get(validate_session))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateParams {
    user_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    is_valid: bool,
}

/// A session is valid while its row exists and is active.
async fn validate_session(
    State(state): State<SessionsState>,
    Query(params): Query<ValidateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
    let (Some(user_id), Some(session_id)) =
        (non_empty(params.user_id), non_empty(params.session_id))
    else {
        return Err(ApiError::bad_request("Missing required parameters"));
    };

    let session = state
        .db
        .sessions()
        .get_session(&user_id, &session_id)
        .await
        .db_err("Failed to validate session")?;

    Ok(Json(ValidateResponse {
        is_valid: session.is_some_and(|s| s.is_active),
    }))
}
