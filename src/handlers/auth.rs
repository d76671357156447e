use crate::handlers::common::{bearer_token, map_service_error, success_response, validate_input};
use crate::{errors::ApiError, errors::ServiceError, AppState};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

/// Creates the router for identity elevation endpoints
pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/link-email", post(link_email))
        .route("/link-provider", post(link_provider))
}

/// Starts email-based elevation of the calling anonymous identity. The
/// directory sends the verification email; the identity keeps its user id.
async fn link_email(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LinkEmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let identity = current_identity(&state, &headers).await?;

    state
        .services
        .identity
        .link_email(&identity, &payload.email, &payload.redirect_url)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Verification email sent"
    })))
}

/// Starts provider-based elevation; responds with the authorization URL to
/// redirect the shopper to.
async fn link_provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LinkProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let identity = current_identity(&state, &headers).await?;

    let url = state
        .services
        .identity
        .link_provider(&identity, &payload.provider, &payload.redirect_url)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "url": url })))
}

async fn current_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::auth::Identity, ApiError> {
    let bearer = bearer_token(headers).ok_or(ServiceError::AuthRequired)?;
    state
        .services
        .identity
        .resolve_identity(false, Some(bearer), None)
        .await
        .map_err(map_service_error)
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct LinkEmailRequest {
    #[validate(email)]
    pub email: String,
    #[validate(url)]
    pub redirect_url: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LinkProviderRequest {
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(url)]
    pub redirect_url: String,
}
