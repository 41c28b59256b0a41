//! Server-side authorization: the edge gate that guards page navigations
//! and the bearer-token extractors that guard the privileged API.
//!
//! Both read the same HS256 identity token. The gate finds it in the
//! identity cookie; the API expects it in an `Authorization: Bearer` header.

mod callback;
mod cookie;
mod errors;
mod extractors;
mod gate;
mod state;

pub use callback::{is_valid_callback_url, resolve_callback_url};
pub use cookie::{get_cookie, get_non_empty_cookie};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, BearerAuth, RoleConstraint};
pub use gate::{
    CALLBACK_PARAM, GateDecision, GatePolicy, GateState, GateViewer, decide, edge_gate,
};
pub use state::HasAuthBackend;
