mod error;
mod sessions;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;

pub use error::{ApiError, ResultExt};
pub use sessions::SessionsState;
pub use users::UsersState;

/// Create the API router.
pub fn create_api_router(db: Database, jwt: Arc<JwtConfig>) -> Router {
    let users_state = users::UsersState {
        db: db.clone(),
        jwt,
    };
    let sessions_state = sessions::SessionsState { db };

    Router::new()
        .nest("/users", users::router(users_state))
        .nest("/sessions", sessions::router(sessions_state))
}
