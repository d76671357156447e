//! Create-order/capture processor adapter.
//!
//! Orders are created up front and captured after shopper approval; the
//! capture response is the completion event for this processor. Intent
//! metadata travels as a JSON-encoded `custom_id` because the wire format
//! has no free-form metadata map.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;

use super::{
    CheckoutHandle, CheckoutIntent, CompletionEvent, ExtractedLineItem, IntentLineItem,
    PaymentProcessor, ProcessorKind,
};

pub struct PaypalProcessor {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    base_url: String,
    token: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    items: Vec<ItemDetail>,
}

#[derive(Debug, Deserialize)]
struct ItemDetail {
    name: String,
    quantity: Option<String>,
    unit_amount: Option<Money>,
    sku: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Money {
    currency_code: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: Option<String>,
    payer: Option<Payer>,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
}

#[derive(Debug, Deserialize)]
struct Payer {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CapturedUnit {
    payments: Option<CapturedPayments>,
}

#[derive(Debug, Deserialize)]
struct CapturedPayments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    amount: Option<Money>,
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error_description: Option<String>,
}

impl PaypalProcessor {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    async fn processor_error(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message.or(body.error_description))
            .unwrap_or_else(|| format!("processor responded with {}", status));
        ServiceError::ProcessorError(message)
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        let access_token = token.access_token.clone();
        *self.token.write().await = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60)),
        });
        Ok(access_token)
    }

    fn order_body(&self, intent: &CheckoutIntent) -> Result<serde_json::Value, ServiceError> {
        let currency = intent.currency.to_ascii_uppercase();
        let mut items = Vec::with_capacity(intent.line_items.len());
        let mut item_total_minor: i64 = 0;

        for line in &intent.line_items {
            match line {
                IntentLineItem::Reference { .. } => {
                    return Err(ServiceError::InvalidCheckoutConfig(
                        "price references require the hosted-checkout processor".to_string(),
                    ));
                }
                IntentLineItem::Priced {
                    name,
                    description,
                    unit_amount_minor,
                    quantity,
                    product_id,
                } => {
                    item_total_minor += unit_amount_minor * i64::from(*quantity);
                    let mut item = serde_json::json!({
                        "name": name,
                        "quantity": quantity.to_string(),
                        "unit_amount": {
                            "currency_code": currency,
                            "value": minor_to_decimal(*unit_amount_minor).to_string(),
                        },
                    });
                    if let Some(description) = description {
                        item["description"] = serde_json::Value::String(description.clone());
                    }
                    if let Some(product_id) = product_id {
                        item["sku"] = serde_json::Value::String(product_id.to_string());
                    }
                    items.push(item);
                }
            }
        }

        let total = minor_to_decimal(item_total_minor).to_string();
        let metadata = serde_json::to_string(&intent.metadata)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        Ok(serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "custom_id": metadata,
                "amount": {
                    "currency_code": currency,
                    "value": total,
                    "breakdown": {
                        "item_total": { "currency_code": currency, "value": total }
                    }
                },
                "items": items,
            }]
        }))
    }
}

#[async_trait]
impl PaymentProcessor for PaypalProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Paypal
    }

    #[instrument(skip(self, intent))]
    async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
    ) -> Result<CheckoutHandle, ServiceError> {
        let body = self.order_body(intent)?;
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let order = response
            .json::<OrderResponse>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        let url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone());

        Ok(CheckoutHandle {
            session_id: order.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn capture(&self, order_ref: &str) -> Result<CompletionEvent, ServiceError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.base_url, order_ref
            ))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let captured = response
            .json::<CaptureResponse>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if captured.status.as_deref() != Some("COMPLETED") {
            return Err(ServiceError::ProcessorError(format!(
                "capture of order {} reported status {:?}",
                order_ref, captured.status
            )));
        }

        let capture = captured
            .purchase_units
            .into_iter()
            .filter_map(|unit| unit.payments)
            .flat_map(|payments| payments.captures)
            .next()
            .ok_or_else(|| {
                ServiceError::ProcessorError(format!(
                    "capture of order {} returned no capture record",
                    order_ref
                ))
            })?;

        Ok(CompletionEvent {
            payment_intent_id: capture.id,
            amount: capture
                .amount
                .as_ref()
                .and_then(parse_money)
                .unwrap_or(Decimal::ZERO),
            currency: capture
                .amount
                .and_then(|money| money.currency_code)
                .unwrap_or_default()
                .to_ascii_lowercase(),
            processor: ProcessorKind::Paypal,
            customer_email: captured.payer.and_then(|payer| payer.email_address),
            metadata: decode_custom_id(capture.custom_id.as_deref()),
            line_item_ref: Some(order_ref.to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn line_items(
        &self,
        payment_ref: &str,
    ) -> Result<Vec<ExtractedLineItem>, ServiceError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!(
                "{}/v2/checkout/orders/{}",
                self.base_url, payment_ref
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let detail = response
            .json::<OrderDetail>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        Ok(detail
            .purchase_units
            .into_iter()
            .flat_map(|unit| unit.items)
            .map(|item| ExtractedLineItem {
                product_id: item
                    .sku
                    .as_deref()
                    .and_then(|sku| Uuid::parse_str(sku).ok()),
                quantity: item
                    .quantity
                    .as_deref()
                    .and_then(|raw| raw.parse::<i32>().ok())
                    .unwrap_or(1),
                unit_price: item
                    .unit_amount
                    .as_ref()
                    .and_then(parse_money)
                    .unwrap_or(Decimal::ZERO),
                name: item.name,
            })
            .collect())
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
    ) -> Result<Option<CompletionEvent>, ServiceError> {
        let json: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

        if json.get("event_type").and_then(serde_json::Value::as_str)
            != Some("PAYMENT.CAPTURE.COMPLETED")
        {
            return Ok(None);
        }

        let resource = json.get("resource").cloned().unwrap_or_default();
        let capture: Capture = serde_json::from_value(resource)
            .map_err(|e| ServiceError::ValidationError(format!("invalid event object: {}", e)))?;

        let order_ref = json
            .get("resource")
            .and_then(|r| r.get("supplementary_data"))
            .and_then(|s| s.get("related_ids"))
            .and_then(|ids| ids.get("order_id"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        Ok(Some(CompletionEvent {
            payment_intent_id: capture.id,
            amount: capture
                .amount
                .as_ref()
                .and_then(parse_money)
                .unwrap_or(Decimal::ZERO),
            currency: capture
                .amount
                .and_then(|money| money.currency_code)
                .unwrap_or_default()
                .to_ascii_lowercase(),
            processor: ProcessorKind::Paypal,
            customer_email: None,
            metadata: decode_custom_id(capture.custom_id.as_deref()),
            line_item_ref: order_ref,
        }))
    }
}

fn parse_money(money: &Money) -> Option<Decimal> {
    money
        .value
        .as_deref()
        .and_then(|raw| Decimal::from_str(raw).ok())
}

fn decode_custom_id(custom_id: Option<&str>) -> HashMap<String, String> {
    custom_id
        .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(raw).ok())
        .unwrap_or_default()
}

fn minor_to_decimal(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}
