//! Axum extractors for bearer-token authentication.

use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::debug;

use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use crate::jwt::IdentityClaims;

/// A role requirement checked against verified claims.
pub trait RoleConstraint: Send + Sync + 'static {
    fn allows(claims: &IdentityClaims) -> bool;
}

/// Identities carrying the admin claim.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(claims: &IdentityClaims) -> bool {
        claims.admin
    }
}

/// Claims of the caller's own ID token, taken from `Authorization: Bearer`.
pub struct BearerAuth<R: RoleConstraint> {
    pub claims: IdentityClaims,
    _role: PhantomData<R>,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<S, R> FromRequestParts<S> for BearerAuth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiAuthError::new(AuthErrorKind::MissingToken))?;

        let claims = state.jwt().validate_id_token(token).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            ApiAuthError::new(AuthErrorKind::InvalidToken)
        })?;

        if !R::allows(&claims) {
            debug!(uid = %claims.sub, "Bearer token lacks required role");
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Self {
            claims,
            _role: PhantomData,
        })
    }
}
