//! Error taxonomy of the session lifecycle core.

/// Authentication failures reported by the identity provider.
///
/// `Display` yields the human-readable message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("This email is already registered. Please try logging in instead.")]
    EmailAlreadyInUse,
    #[error("Invalid email address. Please check and try again.")]
    InvalidEmail,
    #[error("This sign-in method is not enabled. Please contact support.")]
    OperationNotAllowed,
    #[error("Password is too weak. Please use a stronger password.")]
    WeakPassword,
    #[error("This account has been disabled. Please contact support.")]
    UserDisabled,
    #[error("No account found with this email. Please sign up first.")]
    UserNotFound,
    #[error("Incorrect password. Please try again.")]
    WrongPassword,
    #[error("Too many failed attempts. Please try again later.")]
    TooManyRequests,
    #[error("Network error. Please check your connection and try again.")]
    NetworkRequestFailed,
    #[error("This sign-in link is invalid or has expired.")]
    InvalidActionCode,
    /// Provider-specific text from a federated sign-in.
    #[error("{0}")]
    Provider(String),
    #[error("An unexpected error occurred. Please try again.")]
    Internal(String),
}

impl AuthFailure {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmailAlreadyInUse => "auth/email-already-in-use",
            Self::InvalidEmail => "auth/invalid-email",
            Self::OperationNotAllowed => "auth/operation-not-allowed",
            Self::WeakPassword => "auth/weak-password",
            Self::UserDisabled => "auth/user-disabled",
            Self::UserNotFound => "auth/user-not-found",
            Self::WrongPassword => "auth/wrong-password",
            Self::TooManyRequests => "auth/too-many-requests",
            Self::NetworkRequestFailed => "auth/network-request-failed",
            Self::InvalidActionCode => "auth/invalid-action-code",
            Self::Provider(_) => "auth/provider-error",
            Self::Internal(_) => "auth/internal-error",
        }
    }
}

/// Session registry failures. Always non-fatal to the identity outcome.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the privileged role-update endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RoleUpdateError {
    #[error("Missing or invalid authorization")]
    Unauthorized,
    #[error("Requires admin privileges")]
    Forbidden,
    #[error("Target user not found")]
    NotFound,
    #[error("Role update rejected: {0}")]
    Rejected(String),
    #[error("Role endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Errors surfaced by the session controller's operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Authentication(#[from] AuthFailure),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("No email was saved for this sign-in link. Please request a new link.")]
    MissingLinkEmail,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    RoleUpdate(#[from] RoleUpdateError),
}
