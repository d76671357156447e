use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Error raised by the identity directory, normalized to a single message
/// regardless of which provider-specific shape the directory answered with.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DirectoryError {
    pub message: String,
}

impl DirectoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Session record as reported by the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub user_id: Uuid,
    pub email: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Narrow seam to the external identity directory. The directory owns
/// sessions, anonymous-session issuance (including challenge-token
/// verification) and elevation side effects; this crate never mints or
/// verifies credentials itself.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Looks up the session behind a bearer token. `Ok(None)` means no valid
    /// session, which is a normal state, not a failure.
    async fn current_session(&self, bearer: &str) -> Result<Option<SessionInfo>, DirectoryError>;

    /// Exchanges a single-use bot-challenge token for a fresh anonymous
    /// session.
    async fn create_anonymous_session(
        &self,
        challenge_token: &str,
    ) -> Result<SessionInfo, DirectoryError>;

    /// Starts email linking for an anonymous identity; the directory sends
    /// the verification email.
    async fn link_email(
        &self,
        user_id: Uuid,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), DirectoryError>;

    /// Starts provider linking; returns the provider authorization URL the
    /// shopper must be redirected to.
    async fn link_provider(
        &self,
        user_id: Uuid,
        provider: &str,
        redirect_url: &str,
    ) -> Result<String, DirectoryError>;
}

/// HTTP-backed directory client.
pub struct HttpIdentityDirectory {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryErrorBody {
    #[serde(alias = "error_description", alias = "msg")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    url: String,
}

impl HttpIdentityDirectory {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_from_response(response: reqwest::Response) -> DirectoryError {
        let status = response.status();
        let message = response
            .json::<DirectoryErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| format!("identity directory responded with {}", status));
        DirectoryError::new(message)
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityDirectory {
    async fn current_session(&self, bearer: &str) -> Result<Option<SessionInfo>, DirectoryError> {
        let response = self
            .client
            .get(self.endpoint("/auth/v1/session"))
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let session = response
            .json::<SessionInfo>()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;
        Ok(Some(session))
    }

    async fn create_anonymous_session(
        &self,
        challenge_token: &str,
    ) -> Result<SessionInfo, DirectoryError> {
        let response = self
            .client
            .post(self.endpoint("/auth/v1/anonymous"))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "challenge_token": challenge_token }))
            .send()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<SessionInfo>()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))
    }

    async fn link_email(
        &self,
        user_id: Uuid,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), DirectoryError> {
        let response = self
            .client
            .post(self.endpoint(&format!("/auth/v1/users/{}/link-email", user_id)))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "email": email, "redirect_url": redirect_url }))
            .send()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    async fn link_provider(
        &self,
        user_id: Uuid,
        provider: &str,
        redirect_url: &str,
    ) -> Result<String, DirectoryError> {
        let response = self
            .client
            .post(self.endpoint(&format!("/auth/v1/users/{}/link-provider", user_id)))
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "provider": provider, "redirect_url": redirect_url }))
            .send()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response
            .json::<AuthorizeResponse>()
            .await
            .map_err(|e| DirectoryError::new(e.to_string()))?;
        Ok(body.url)
    }
}
