use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::payments::{webhook::verify_signature, ProcessorKind};
use crate::services::ReconciliationOutcome;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

/// Webhook replay tolerance in seconds.
const SIGNATURE_TOLERANCE_SECS: u64 = 300;

/// Creates the router for payment completion endpoints
pub fn payment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route("/capture", post(capture_payment))
}

/// Asynchronous completion delivery from a processor.
///
/// Once the signature checks out the response is always 2xx, even when
/// downstream persistence or notification partially failed; any non-2xx
/// would make the processor retry a delivery that cannot go differently.
/// Only a signature failure is a 400, and nothing is written in that case.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    verify_signature(
        &headers,
        &body,
        &state.config.stripe.webhook_secret,
        SIGNATURE_TOLERANCE_SECS,
    )
    .map_err(|e| {
        warn!("webhook signature verification failed");
        map_service_error(e)
    })?;

    for processor in state.services.processors() {
        match processor.parse_webhook_event(&body) {
            Ok(Some(event)) => {
                if let Err(e) = state
                    .services
                    .reconciliation
                    .reconcile(event, processor.as_ref())
                    .await
                {
                    error!("reconciliation failed after verified webhook: {}", e);
                }
                return Ok(success_response(serde_json::json!({ "received": true })));
            }
            Ok(None) => continue,
            Err(e) => {
                warn!(processor = %processor.kind(), "webhook payload not parseable: {}", e);
                continue;
            }
        }
    }

    info!("verified webhook carried no completion event");
    Ok(success_response(serde_json::json!({ "received": true })))
}

/// Synchronous capture of an approved processor order. The capture response
/// is the completion event and is reconciled on the spot.
async fn capture_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let kind = match payload.processor.as_deref() {
        Some(raw) => ProcessorKind::parse(raw).map_err(map_service_error)?,
        None => ProcessorKind::Paypal,
    };
    let processor = state.services.processor(kind).map_err(map_service_error)?;

    let event = processor
        .capture(&payload.order_id)
        .await
        .map_err(map_service_error)?;
    let amount = event.amount;

    let outcome = state
        .services
        .reconciliation
        .reconcile(event, processor.as_ref())
        .await
        .map_err(map_service_error)?;

    let status = match &outcome {
        ReconciliationOutcome::Created { .. } => "completed",
        ReconciliationOutcome::Duplicate { .. } => "already_processed",
    };

    Ok(success_response(serde_json::json!({
        "success": true,
        "order_id": outcome.order_id(),
        "status": status,
        "amount": amount,
    })))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct CaptureRequest {
    /// Processor-side order reference to capture
    #[validate(length(min = 1))]
    pub order_id: String,
    #[serde(default)]
    pub processor: Option<String>,
}
