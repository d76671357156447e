use crate::handlers::common::{bearer_token, map_service_error, success_response};
use crate::payments::{CheckoutPayload, ProcessorKind};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(start_checkout))
}

/// Start a checkout attempt against the selected processor.
///
/// Anonymous shoppers are elevated through the bot challenge during this
/// call; `401 challenge_required` tells the client to render the widget and
/// retry with a token.
async fn start_checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = match payload.processor.as_deref() {
        Some(raw) => ProcessorKind::parse(raw).map_err(map_service_error)?,
        None => ProcessorKind::Stripe,
    };
    let processor = state.services.processor(kind).map_err(map_service_error)?;

    let (handle, identity) = state
        .services
        .checkout
        .start_checkout(
            payload.checkout,
            processor.as_ref(),
            bearer_token(&headers),
            payload.challenge_token.as_deref(),
        )
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "session_id": handle.session_id,
        "url": handle.url,
        "is_anonymous": identity.is_anonymous,
    })))
}

// Request DTOs

#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    #[serde(flatten)]
    pub checkout: CheckoutPayload,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub challenge_token: Option<String>,
}
