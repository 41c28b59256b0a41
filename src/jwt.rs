//! Identity token generation and validation.
//!
//! Identity tokens are short-lived signed JWTs carrying the principal's
//! profile claims and the `admin` role claim. The same key material is used
//! by the identity provider (signing) and the edge gate (verification).

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity token duration: 1 hour
pub const ID_TOKEN_DURATION_SECS: u64 = 60 * 60;

/// JWT claims for identity tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (stable identity id)
    pub sub: String,
    /// Email address
    pub email: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Photo reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    /// Role claim. Absent means not an admin.
    #[serde(default)]
    pub admin: bool,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Profile fields copied into a freshly minted token.
#[derive(Debug, Clone, Default)]
pub struct TokenSubject<'a> {
    pub uid: &'a str,
    pub email: &'a str,
    pub display_name: Option<&'a str>,
    pub photo_url: Option<&'a str>,
    pub email_verified: bool,
    pub admin: bool,
}

/// Result of generating an identity token.
#[derive(Debug, Clone)]
pub struct IdTokenResult {
    /// The JWT token string
    pub token: String,
    /// Decoded claims of `token`
    pub claims: IdentityClaims,
    /// Token duration in seconds
    pub duration: u64,
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Generate an identity token for a principal.
    pub fn generate_id_token(&self, subject: &TokenSubject<'_>) -> Result<IdTokenResult, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();

        let claims = IdentityClaims {
            sub: subject.uid.to_string(),
            email: subject.email.to_string(),
            name: subject.display_name.map(str::to_string),
            picture: subject.photo_url.map(str::to_string),
            email_verified: subject.email_verified,
            admin: subject.admin,
            iat: now,
            exp: now + ID_TOKEN_DURATION_SECS,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(IdTokenResult {
            token,
            claims,
            duration: ID_TOKEN_DURATION_SECS,
        })
    }

    /// Validate and decode an identity token.
    pub fn validate_id_token(&self, token: &str) -> Result<IdentityClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data =
            jsonwebtoken::decode::<IdentityClaims>(token, &self.decoding_key, &validation)
                .map_err(JwtError::Decoding)?;

        if token_data.claims.sub.is_empty() {
            return Err(JwtError::MissingSubject);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("Failed to decode token: {0}")]
    Decoding(jsonwebtoken::errors::Error),
    #[error("System time error")]
    TimeError,
    #[error("Token has no subject")]
    MissingSubject,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(admin: bool) -> TokenSubject<'static> {
        TokenSubject {
            uid: "uid-123",
            email: "alice@example.com",
            display_name: Some("Alice"),
            photo_url: None,
            email_verified: true,
            admin,
        }
    }

    #[test]
    fn test_generate_and_validate_id_token() {
        let config = JwtConfig::new(b"test-secret-key-for-testing");

        let result = config.generate_id_token(&subject(false)).unwrap();
        assert_eq!(result.duration, ID_TOKEN_DURATION_SECS);

        let claims = config.validate_id_token(&result.token).unwrap();
        assert_eq!(claims, result.claims);
        assert_eq!(claims.sub, "uid-123");
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.name.as_deref(), Some("Alice"));
        assert!(claims.email_verified);
        assert!(!claims.admin);
        assert_eq!(claims.exp - claims.iat, ID_TOKEN_DURATION_SECS);
    }

    #[test]
    fn test_admin_claim_in_token() {
        let config = JwtConfig::new(b"test-secret-key-for-testing");

        let result = config.generate_id_token(&subject(true)).unwrap();

        let claims = config.validate_id_token(&result.token).unwrap();
        assert!(claims.admin);
    }

    #[test]
    fn test_missing_admin_claim_defaults_to_false() {
        let secret = b"test-secret";
        let encoding_key = EncodingKey::from_secret(secret);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let claims = serde_json::json!({
            "sub": "uid-1",
            "email": "bob@example.com",
            "iat": now,
            "exp": now + 60,
        });
        let token = jsonwebtoken::encode(&Header::default(), &claims, &encoding_key).unwrap();

        let decoded = JwtConfig::new(secret).validate_id_token(&token).unwrap();
        assert!(!decoded.admin);
        assert!(!decoded.email_verified);
        assert_eq!(decoded.name, None);
    }

    #[test]
    fn test_invalid_token() {
        let config = JwtConfig::new(b"test-secret-key-for-testing");

        assert!(config.validate_id_token("invalid-token").is_err());
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = JwtConfig::new(b"secret-1");
        let config2 = JwtConfig::new(b"secret-2");

        let result = config1.generate_id_token(&subject(true)).unwrap();

        assert!(config2.validate_id_token(&result.token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let secret = b"test-secret";
        let encoding_key = EncodingKey::from_secret(secret);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let claims = IdentityClaims {
            sub: "uid-123".to_string(),
            email: "alice@example.com".to_string(),
            name: None,
            picture: None,
            email_verified: false,
            admin: true,
            iat: now - 100,
            exp: now - 50, // Expired 50 seconds ago
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &encoding_key).unwrap();

        let config = JwtConfig::new(secret);
        assert!(config.validate_id_token(&token).is_err());
    }
}
