//! Processor-agnostic payment surface.
//!
//! One [`PaymentProcessor`] trait, two adapters: a hosted-checkout-session
//! processor ([`stripe`]) and a create-order/capture processor ([`paypal`]).
//! The reconciler only ever sees [`CompletionEvent`]s and extracted line
//! items, never processor-specific shapes.

pub mod intent;
pub mod paypal;
pub mod stripe;
pub mod webhook;

pub use intent::{CheckoutInput, CheckoutIntent, CheckoutPayload, IntentLineItem};

use crate::entities::order::OrderType;
use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Which processor a checkout or completion event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Stripe,
    Paypal,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Stripe => "stripe",
            ProcessorKind::Paypal => "paypal",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ServiceError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stripe" => Ok(ProcessorKind::Stripe),
            "paypal" => Ok(ProcessorKind::Paypal),
            other => Err(ServiceError::ValidationError(format!(
                "unknown payment processor: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque redirect/approval handle returned by session creation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutHandle {
    pub session_id: String,
    pub url: Option<String>,
}

/// A processor's completed-payment signal, whether delivered by webhook or
/// returned by a synchronous capture call.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    /// Unique payment identifier; the idempotency key for order creation.
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub processor: ProcessorKind,
    pub customer_email: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Processor-side reference for re-reading line items (checkout session
    /// id or processor order id). Absent when the processor cannot list
    /// items for this payment.
    pub line_item_ref: Option<String>,
}

impl CompletionEvent {
    /// Order type from metadata. Payments created before order-type tagging
    /// carry no key and default to `cart`.
    pub fn order_type(&self) -> OrderType {
        match self.metadata.get("order_type").map(String::as_str) {
            Some("service_package") => OrderType::ServicePackage,
            _ => OrderType::Cart,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.metadata
            .get("user_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn is_anonymous(&self) -> bool {
        self.metadata
            .get("is_anonymous")
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn package_name(&self) -> Option<&str> {
        self.metadata.get("package_name").map(String::as_str)
    }
}

/// Line item as re-read from the processor after payment. Client-side cart
/// state is never trusted for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLineItem {
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub product_id: Option<Uuid>,
}

/// Seam to a payment processor. Adapters own all wire formats.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    /// Creates a hosted checkout session (or processor order) for an intent
    /// and returns the redirect handle. One network call, no retries.
    async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
    ) -> Result<CheckoutHandle, ServiceError>;

    /// Synchronously captures a previously approved order. The capture
    /// response is the completion event for this path.
    async fn capture(&self, order_ref: &str) -> Result<CompletionEvent, ServiceError>;

    /// Re-reads the actual line items of a completed payment.
    async fn line_items(&self, payment_ref: &str)
        -> Result<Vec<ExtractedLineItem>, ServiceError>;

    /// Parses a webhook payload into a completion event. `Ok(None)` means
    /// the payload is authentic but not an event this adapter completes
    /// orders for.
    fn parse_webhook_event(&self, payload: &[u8]) -> Result<Option<CompletionEvent>, ServiceError>;
}
