//! Client of the privileged role-update endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::errors::RoleUpdateError;

/// Body of `POST /api/users/role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdateRequest {
    #[serde(default, alias = "userId", skip_serializing_if = "Option::is_none")]
    pub target_uid: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Sets the admin claim of another identity. Authorization is the caller's
/// own ID token; the server checks that it carries the admin claim.
#[async_trait]
pub trait RoleEndpoint: Send + Sync + 'static {
    async fn update_role(
        &self,
        bearer_token: &str,
        target_uid: &str,
        is_admin: bool,
    ) -> Result<(), RoleUpdateError>;
}

#[derive(Debug, Clone)]
pub struct HttpRoleEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpRoleEndpoint {
    /// `url` is the full endpoint URL, e.g. `https://app.example/api/users/role`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl RoleEndpoint for HttpRoleEndpoint {
    async fn update_role(
        &self,
        bearer_token: &str,
        target_uid: &str,
        is_admin: bool,
    ) -> Result<(), RoleUpdateError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(bearer_token)
            .json(&RoleUpdateRequest {
                target_uid: Some(target_uid.to_string()),
                is_admin,
            })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                info!(target_uid = %target_uid, is_admin, "Role updated");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => Err(RoleUpdateError::Unauthorized),
            StatusCode::FORBIDDEN => Err(RoleUpdateError::Forbidden),
            StatusCode::NOT_FOUND => Err(RoleUpdateError::NotFound),
            status => {
                let message = match response.json::<ErrorBody>().await {
                    Ok(body) => body.error,
                    Err(_) => status.to_string(),
                };
                warn!(status = %status, error = %message, "Role update rejected");
                Err(RoleUpdateError::Rejected(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_user_id_alias() {
        let request: RoleUpdateRequest =
            serde_json::from_str(r#"{"userId":"uid-2","isAdmin":true}"#).unwrap();
        assert_eq!(request.target_uid.as_deref(), Some("uid-2"));
        assert!(request.is_admin);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["targetUid"], "uid-2");
    }

    #[test]
    fn test_request_without_target() {
        let request: RoleUpdateRequest = serde_json::from_str(r#"{"isAdmin":true}"#).unwrap();
        assert_eq!(request.target_uid, None);
    }
}
