use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable code clients can branch on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Service-level error taxonomy.
///
/// `AuthRequired` and `ChallengeRequired` are control states rather than
/// faults: they tell the caller which UI action (sign-in link or challenge
/// widget) unblocks the flow. They still travel through the error channel so
/// handlers map them to a stable status + code.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid checkout configuration: {0}")]
    InvalidCheckoutConfig(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Challenge verification required")]
    ChallengeRequired,

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Identity is not anonymous")]
    NotAnonymous,

    #[error("Payment processor error: {0}")]
    ProcessorError(String),

    #[error("Webhook signature verification failed")]
    SignatureVerificationFailed,

    #[error("Persistence inconsistency: {0}")]
    PersistenceInconsistency(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::DatabaseError(_)
            | ServiceError::PersistenceInconsistency(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_)
            | ServiceError::InvalidCheckoutConfig(_)
            | ServiceError::SignatureVerificationFailed => StatusCode::BAD_REQUEST,
            ServiceError::AuthRequired
            | ServiceError::ChallengeRequired
            | ServiceError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ServiceError::NotAnonymous => StatusCode::CONFLICT,
            ServiceError::ProcessorError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::DatabaseError(_) => "database_error",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::ValidationError(_) => "validation_error",
            ServiceError::InvalidCheckoutConfig(_) => "invalid_checkout_config",
            ServiceError::AuthRequired => "auth_required",
            ServiceError::ChallengeRequired => "challenge_required",
            ServiceError::AuthError(_) => "auth_error",
            ServiceError::NotAnonymous => "not_anonymous",
            ServiceError::ProcessorError(_) => "processor_error",
            ServiceError::SignatureVerificationFailed => "signature_verification_failed",
            ServiceError::PersistenceInconsistency(_) => "persistence_inconsistency",
            ServiceError::InternalError(_) => "internal_error",
        }
    }

    /// Message safe to expose to clients. Internal failures are collapsed so
    /// database details never leak through the HTTP surface.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_) | ServiceError::InternalError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Handler-level error wrapper.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    InternalServerError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_code) = match &self {
            ApiError::ServiceError(service_error) => (
                service_error.status_code(),
                service_error.response_message(),
                Some(service_error.error_code().to_string()),
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                Some("validation_error".to_string()),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message,
            error_code,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        ApiError::ServiceError(self).into_response()
    }
}
