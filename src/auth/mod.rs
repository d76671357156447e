//! Identity resolution and anonymous-identity elevation.
//!
//! An anonymous identity is a fully authenticated principal flagged
//! `is_anonymous`; elevation links an email or external provider to it
//! without ever changing the `user_id`.

pub mod directory;

pub use directory::{DirectoryError, HttpIdentityDirectory, IdentityDirectory, SessionInfo};

use crate::errors::ServiceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// The uniform identity triple handed to the checkout pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub is_anonymous: bool,
}

impl From<SessionInfo> for Identity {
    fn from(session: SessionInfo) -> Self {
        Self {
            user_id: session.user_id,
            email: session.email,
            is_anonymous: session.is_anonymous,
        }
    }
}

/// Wraps the identity directory behind the four-step resolution contract.
#[derive(Clone)]
pub struct IdentityService {
    directory: Arc<dyn IdentityDirectory>,
}

impl IdentityService {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves the shopper's identity for a checkout attempt.
    ///
    /// An existing session wins unconditionally. Without one,
    /// `allow_anonymous` gates the flow: disallowed ⇒ `AuthRequired`;
    /// allowed but no challenge token yet ⇒ `ChallengeRequired` (the caller
    /// renders the challenge widget and retries); token present ⇒ exchange it
    /// for a fresh anonymous session. Challenge tokens are single-use, so a
    /// failed exchange means the shopper has to re-solve.
    #[instrument(skip(self, bearer, challenge_token))]
    pub async fn resolve_identity(
        &self,
        allow_anonymous: bool,
        bearer: Option<&str>,
        challenge_token: Option<&str>,
    ) -> Result<Identity, ServiceError> {
        if let Some(token) = bearer {
            if let Some(session) = self
                .directory
                .current_session(token)
                .await
                .map_err(|e| ServiceError::AuthError(e.message))?
            {
                return Ok(session.into());
            }
        }

        if !allow_anonymous {
            return Err(ServiceError::AuthRequired);
        }

        let challenge_token = challenge_token.ok_or(ServiceError::ChallengeRequired)?;

        let session = self
            .directory
            .create_anonymous_session(challenge_token)
            .await
            .map_err(|e| ServiceError::AuthError(e.message))?;

        info!(user_id = %session.user_id, "anonymous session created");
        Ok(Identity {
            user_id: session.user_id,
            email: session.email,
            is_anonymous: true,
        })
    }

    /// Starts email-based elevation. Only anonymous identities can be
    /// elevated; the directory sends the verification email.
    #[instrument(skip(self, redirect_url))]
    pub async fn link_email(
        &self,
        identity: &Identity,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), ServiceError> {
        if !identity.is_anonymous {
            return Err(ServiceError::NotAnonymous);
        }
        self.directory
            .link_email(identity.user_id, email, redirect_url)
            .await
            .map_err(|e| ServiceError::AuthError(e.message))?;
        info!(user_id = %identity.user_id, "email elevation started");
        Ok(())
    }

    /// Starts provider-based elevation and returns the authorization URL to
    /// redirect the shopper to.
    #[instrument(skip(self, redirect_url))]
    pub async fn link_provider(
        &self,
        identity: &Identity,
        provider: &str,
        redirect_url: &str,
    ) -> Result<String, ServiceError> {
        if !identity.is_anonymous {
            return Err(ServiceError::NotAnonymous);
        }
        let url = self
            .directory
            .link_provider(identity.user_id, provider, redirect_url)
            .await
            .map_err(|e| ServiceError::AuthError(e.message))?;
        info!(user_id = %identity.user_id, provider, "provider elevation started");
        Ok(url)
    }
}
