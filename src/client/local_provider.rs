//! Identity provider backed by the local `users` table.
//!
//! Passwords are stored as Argon2 PHC strings. ID tokens are cached per uid
//! and re-minted when forced or close to expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::Url;

use super::errors::AuthFailure;
use super::provider::{Credential, FederatedAssertion, IdentityProvider, ProviderEvent};
use super::types::Identity;
use crate::db::{Database, NewUser, User};
use crate::jwt::{IdTokenResult, JwtConfig, TokenSubject};
use crate::rate_limit::{DEFAULT_SIGN_IN_ATTEMPTS_PER_MINUTE, SignInRateLimit};

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// A cached token is reused until this close to expiry.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 5 * 60;

const LINK_CODE_PARAM: &str = "oobCode";
const LINK_MODE_PARAM: &str = "mode";
const LINK_MODE_SIGN_IN: &str = "signIn";

/// A sign-in link handed to the out-of-band delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInLinkMessage {
    pub email: String,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub sign_in_attempts_per_minute: u32,
    /// Federated provider ids accepted by `sign_in_with_federated`.
    pub federated_providers: Vec<String>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            sign_in_attempts_per_minute: DEFAULT_SIGN_IN_ATTEMPTS_PER_MINUTE,
            federated_providers: vec!["google.com".to_string()],
        }
    }
}

pub struct LocalIdentityProvider {
    db: Database,
    jwt: Arc<JwtConfig>,
    config: LocalProviderConfig,
    limiter: SignInRateLimit,
    tokens: Mutex<HashMap<String, IdTokenResult>>,
    events: broadcast::Sender<ProviderEvent>,
    link_outbox: Option<mpsc::UnboundedSender<SignInLinkMessage>>,
}

impl LocalIdentityProvider {
    pub fn new(db: Database, jwt: Arc<JwtConfig>) -> Self {
        Self::with_config(db, jwt, LocalProviderConfig::default())
    }

    pub fn with_config(db: Database, jwt: Arc<JwtConfig>, config: LocalProviderConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            db,
            jwt,
            limiter: SignInRateLimit::per_minute(config.sign_in_attempts_per_minute),
            config,
            tokens: Mutex::new(HashMap::new()),
            events,
            link_outbox: None,
        }
    }

    /// Deliver sign-in links to `outbox` instead of dropping them.
    pub fn with_link_outbox(mut self, outbox: mpsc::UnboundedSender<SignInLinkMessage>) -> Self {
        self.link_outbox = Some(outbox);
        self
    }

    /// Disable an account. Its cached token is dropped and every listener is
    /// told the identity is signed out.
    pub async fn disable_user(&self, uid: &str) -> Result<(), AuthFailure> {
        let found = self
            .db
            .users()
            .set_disabled(uid, true)
            .await
            .map_err(internal)?;
        if !found {
            return Err(AuthFailure::UserNotFound);
        }
        self.forget_token(uid);
        info!(uid = %uid, "User disabled");
        let _ = self.events.send(ProviderEvent::SignedOut {
            uid: uid.to_string(),
        });
        Ok(())
    }

    fn forget_token(&self, uid: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uid);
    }

    fn cached_token(&self, uid: &str) -> Option<IdTokenResult> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = tokens.get(uid)?;
        (cached.claims.exp > unix_now() + TOKEN_REFRESH_MARGIN_SECS).then(|| cached.clone())
    }

    fn mint(&self, user: &User) -> Result<IdTokenResult, AuthFailure> {
        let token = self
            .jwt
            .generate_id_token(&TokenSubject {
                uid: &user.uid,
                email: &user.email,
                display_name: user.display_name.as_deref(),
                photo_url: user.photo_url.as_deref(),
                email_verified: user.email_verified,
                admin: user.admin,
            })
            .map_err(internal)?;
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.uid.clone(), token.clone());
        Ok(token)
    }

    fn credential(&self, user: &User, is_new_user: bool) -> Result<Credential, AuthFailure> {
        let token = self.mint(user)?;
        Ok(Credential {
            identity: Identity::from_claims(&token.claims),
            token,
            is_new_user,
        })
    }

    async fn load_user(&self, uid: &str) -> Result<User, AuthFailure> {
        let user = self
            .db
            .users()
            .get_by_uid(uid)
            .await
            .map_err(internal)?
            .ok_or(AuthFailure::UserNotFound)?;
        if user.disabled {
            return Err(AuthFailure::UserDisabled);
        }
        Ok(user)
    }

    /// Return the user for `email`, creating a password-less account if none exists.
    async fn find_or_create(
        &self,
        email: &str,
        new_user: NewUser<'_>,
    ) -> Result<(User, bool), AuthFailure> {
        if let Some(user) = self.db.users().get_by_email(email).await.map_err(internal)? {
            if user.disabled {
                return Err(AuthFailure::UserDisabled);
            }
            return Ok((user, false));
        }

        self.db
            .users()
            .create(&new_user)
            .await
            .map_err(map_create_error)?;
        let user = self.load_user(new_user.uid).await?;
        info!(uid = %user.uid, provider = %user.provider, "User created");
        Ok((user, true))
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credential, AuthFailure> {
        validate_email(email)?;
        if !self.limiter.check(email) {
            warn!(email = %email, "Too many sign-in attempts");
            return Err(AuthFailure::TooManyRequests);
        }

        let user = self
            .db
            .users()
            .get_by_email(email)
            .await
            .map_err(internal)?
            .ok_or(AuthFailure::UserNotFound)?;
        if user.disabled {
            return Err(AuthFailure::UserDisabled);
        }
        let Some(hash) = user.password_hash.clone() else {
            return Err(AuthFailure::WrongPassword);
        };
        if !verify_password(password.to_string(), hash).await {
            debug!(uid = %user.uid, "Password mismatch");
            return Err(AuthFailure::WrongPassword);
        }

        self.credential(&user, false)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<Credential, AuthFailure> {
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthFailure::WeakPassword);
        }
        if self
            .db
            .users()
            .get_by_email(email)
            .await
            .map_err(internal)?
            .is_some()
        {
            return Err(AuthFailure::EmailAlreadyInUse);
        }

        let hash = hash_password(password.to_string()).await?;
        let uid = uuid::Uuid::new_v4().to_string();
        self.db
            .users()
            .create(&NewUser {
                uid: &uid,
                email,
                password_hash: Some(&hash),
                provider: "password",
                ..Default::default()
            })
            .await
            .map_err(map_create_error)?;
        info!(uid = %uid, "User created");

        let user = self.load_user(&uid).await?;
        self.credential(&user, true)
    }

    async fn sign_in_with_federated(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<Credential, AuthFailure> {
        if !self
            .config
            .federated_providers
            .iter()
            .any(|p| p == &assertion.provider)
        {
            return Err(AuthFailure::OperationNotAllowed);
        }
        validate_email(&assertion.email)?;

        let uid = uuid::Uuid::new_v4().to_string();
        let (user, is_new_user) = self
            .find_or_create(
                &assertion.email,
                NewUser {
                    uid: &uid,
                    email: &assertion.email,
                    display_name: assertion.display_name.as_deref(),
                    photo_url: assertion.photo_url.as_deref(),
                    email_verified: true,
                    provider: &assertion.provider,
                    ..Default::default()
                },
            )
            .await?;
        self.credential(&user, is_new_user)
    }

    async fn send_sign_in_link(
        &self,
        email: &str,
        continue_url: &str,
    ) -> Result<(), AuthFailure> {
        validate_email(email)?;
        let mut link = Url::parse(continue_url)
            .map_err(|e| AuthFailure::Internal(format!("Invalid continue URL: {}", e)))?;

        let code: String = rand::rng()
            .random::<[u8; 32]>()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.db
            .sign_in_links()
            .create(&code, email)
            .await
            .map_err(internal)?;

        link.query_pairs_mut()
            .append_pair(LINK_MODE_PARAM, LINK_MODE_SIGN_IN)
            .append_pair(LINK_CODE_PARAM, &code);

        info!(email = %email, "Sign-in link issued");
        match &self.link_outbox {
            Some(outbox) => {
                let _ = outbox.send(SignInLinkMessage {
                    email: email.to_string(),
                    link: link.to_string(),
                });
            }
            None => debug!("No sign-in link outbox configured; link dropped"),
        }
        Ok(())
    }

    fn is_sign_in_link(&self, link: &str) -> bool {
        link_code(link).is_some()
    }

    async fn sign_in_with_email_link(
        &self,
        email: &str,
        link: &str,
    ) -> Result<Credential, AuthFailure> {
        validate_email(email)?;
        let code = link_code(link).ok_or(AuthFailure::InvalidActionCode)?;
        let record = self
            .db
            .sign_in_links()
            .consume(&code)
            .await
            .map_err(internal)?
            .ok_or(AuthFailure::InvalidActionCode)?;
        if !record.email.eq_ignore_ascii_case(email) {
            return Err(AuthFailure::InvalidActionCode);
        }

        let uid = uuid::Uuid::new_v4().to_string();
        let (user, is_new_user) = self
            .find_or_create(
                email,
                NewUser {
                    uid: &uid,
                    email,
                    email_verified: true,
                    provider: "emailLink",
                    ..Default::default()
                },
            )
            .await?;
        if !user.email_verified {
            self.db
                .users()
                .mark_email_verified(&user.uid)
                .await
                .map_err(internal)?;
        }
        let user = self.load_user(&user.uid).await?;
        self.credential(&user, is_new_user)
    }

    async fn id_token(&self, uid: &str, force: bool) -> Result<IdTokenResult, AuthFailure> {
        if !force {
            if let Some(cached) = self.cached_token(uid) {
                return Ok(cached);
            }
        }
        let user = self.load_user(uid).await?;
        self.mint(&user)
    }

    async fn sign_out(&self, uid: &str) -> Result<(), AuthFailure> {
        self.forget_token(uid);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

fn internal(e: impl std::fmt::Display) -> AuthFailure {
    warn!(error = %e, "Identity provider internal error");
    AuthFailure::Internal(e.to_string())
}

fn map_create_error(e: sqlx::Error) -> AuthFailure {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => AuthFailure::EmailAlreadyInUse,
        _ => internal(e),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reject anything that is not `local@domain` without whitespace.
fn validate_email(email: &str) -> Result<(), AuthFailure> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(AuthFailure::InvalidEmail),
    }
}

fn link_code(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let mut mode = None;
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            LINK_MODE_PARAM => mode = Some(value.into_owned()),
            LINK_CODE_PARAM => code = Some(value.into_owned()),
            _ => {}
        }
    }
    match (mode.as_deref(), code) {
        (Some(LINK_MODE_SIGN_IN), Some(code)) if !code.is_empty() => Some(code),
        _ => None,
    }
}

async fn hash_password(password: String) -> Result<String, AuthFailure> {
    tokio::task::spawn_blocking(move || {
        let salt_bytes: [u8; 16] = rand::rng().random();
        let salt = SaltString::encode_b64(&salt_bytes).map_err(internal)?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|phc| phc.to_string())
            .map_err(internal)
    })
    .await
    .map_err(internal)?
}

async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .unwrap_or(false)
}
