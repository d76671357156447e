//! Hosted-checkout-session processor adapter.
//!
//! Sessions are created with a single form-encoded REST call; completion
//! arrives through the signed webhook. Line items are re-read from the
//! session with the product expanded so linked product ids survive the
//! round trip.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ServiceError;

use super::{
    CheckoutHandle, CheckoutIntent, CompletionEvent, ExtractedLineItem, IntentLineItem,
    PaymentProcessor, ProcessorKind,
};

const API_BASE: &str = "https://api.stripe.com/v1";

pub struct StripeProcessor {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionDetail {
    id: String,
    payment_intent: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineItemList {
    #[serde(default)]
    data: Vec<LineItemEntry>,
}

#[derive(Debug, Deserialize)]
struct LineItemEntry {
    description: Option<String>,
    quantity: Option<i64>,
    price: Option<PriceEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    unit_amount: Option<i64>,
    product: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl StripeProcessor {
    pub fn new(
        secret_key: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self::with_api_base(secret_key, success_url, cancel_url, API_BASE)
    }

    pub fn with_api_base(
        secret_key: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    async fn processor_error(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .and_then(|detail| detail.message)
            .unwrap_or_else(|| format!("processor responded with {}", status));
        ServiceError::ProcessorError(message)
    }

    fn session_form(&self, intent: &CheckoutIntent) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];
        for (key, value) in &intent.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        for (i, line) in intent.line_items.iter().enumerate() {
            match line {
                IntentLineItem::Reference { price_id, quantity } => {
                    form.push((format!("line_items[{}][price]", i), price_id.clone()));
                    form.push((format!("line_items[{}][quantity]", i), quantity.to_string()));
                }
                IntentLineItem::Priced {
                    name,
                    description,
                    unit_amount_minor,
                    quantity,
                    product_id,
                } => {
                    form.push((
                        format!("line_items[{}][price_data][currency]", i),
                        intent.currency.clone(),
                    ));
                    form.push((
                        format!("line_items[{}][price_data][unit_amount]", i),
                        unit_amount_minor.to_string(),
                    ));
                    form.push((
                        format!("line_items[{}][price_data][product_data][name]", i),
                        name.clone(),
                    ));
                    if let Some(description) = description {
                        form.push((
                            format!("line_items[{}][price_data][product_data][description]", i),
                            description.clone(),
                        ));
                    }
                    if let Some(product_id) = product_id {
                        form.push((
                            format!(
                                "line_items[{}][price_data][product_data][metadata][product_id]",
                                i
                            ),
                            product_id.to_string(),
                        ));
                    }
                    form.push((format!("line_items[{}][quantity]", i), quantity.to_string()));
                }
            }
        }
        form
    }

    fn event_from_session(&self, session: SessionDetail) -> CompletionEvent {
        CompletionEvent {
            payment_intent_id: session.payment_intent.unwrap_or_else(|| session.id.clone()),
            amount: minor_to_decimal(session.amount_total.unwrap_or(0)),
            currency: session.currency.unwrap_or_default(),
            processor: ProcessorKind::Stripe,
            customer_email: session.customer_details.and_then(|d| d.email),
            metadata: session.metadata,
            line_item_ref: Some(session.id),
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Stripe
    }

    #[instrument(skip(self, intent))]
    async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
    ) -> Result<CheckoutHandle, ServiceError> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&self.session_form(intent))
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let session = response
            .json::<SessionResponse>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;
        Ok(CheckoutHandle {
            session_id: session.id,
            url: session.url,
        })
    }

    #[instrument(skip(self))]
    async fn capture(&self, order_ref: &str) -> Result<CompletionEvent, ServiceError> {
        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.api_base, order_ref))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let session = response
            .json::<SessionDetail>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if session.payment_status.as_deref() != Some("paid") {
            return Err(ServiceError::ProcessorError(format!(
                "checkout session {} is not paid",
                order_ref
            )));
        }

        Ok(self.event_from_session(session))
    }

    #[instrument(skip(self))]
    async fn line_items(
        &self,
        payment_ref: &str,
    ) -> Result<Vec<ExtractedLineItem>, ServiceError> {
        let response = self
            .client
            .get(format!(
                "{}/checkout/sessions/{}/line_items",
                self.api_base, payment_ref
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(&[("expand[]", "data.price.product")])
            .send()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::processor_error(response).await);
        }

        let list = response
            .json::<LineItemList>()
            .await
            .map_err(|e| ServiceError::ProcessorError(e.to_string()))?;

        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                let product_id = entry
                    .price
                    .as_ref()
                    .and_then(|price| price.product.as_ref())
                    .and_then(linked_product_id);
                ExtractedLineItem {
                    name: entry.description.unwrap_or_else(|| "Item".to_string()),
                    quantity: entry.quantity.unwrap_or(1) as i32,
                    unit_price: minor_to_decimal(
                        entry.price.and_then(|price| price.unit_amount).unwrap_or(0),
                    ),
                    product_id,
                }
            })
            .collect())
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
    ) -> Result<Option<CompletionEvent>, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

        if json.get("type").and_then(Value::as_str) != Some("checkout.session.completed") {
            return Ok(None);
        }

        let object = json
            .get("data")
            .and_then(|data| data.get("object"))
            .cloned()
            .ok_or_else(|| {
                ServiceError::ValidationError("event payload missing data.object".to_string())
            })?;

        let session: SessionDetail = serde_json::from_value(object)
            .map_err(|e| ServiceError::ValidationError(format!("invalid event object: {}", e)))?;

        Ok(Some(self.event_from_session(session)))
    }
}

/// Reads the linked product id from an expanded product object's metadata.
fn linked_product_id(product: &Value) -> Option<Uuid> {
    product
        .get("metadata")
        .and_then(|metadata| metadata.get("product_id"))
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn minor_to_decimal(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::payments::intent::{CheckoutInput, CheckoutPayload};
    use rust_decimal_macros::dec;

    fn processor() -> StripeProcessor {
        StripeProcessor::new(
            "sk_test_123",
            "https://shop.test/success",
            "https://shop.test/cancelled",
        )
    }

    fn intent_for(payload: CheckoutPayload) -> CheckoutIntent {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: None,
            is_anonymous: true,
        };
        let input = CheckoutInput::resolve(payload).unwrap();
        CheckoutIntent::build(input, &identity, "eur", None).unwrap()
    }

    #[test]
    fn session_form_encodes_price_reference() {
        let intent = intent_for(CheckoutPayload {
            price_id: Some("price_abc".to_string()),
            ..Default::default()
        });
        let form = processor().session_form(&intent);

        assert!(form.contains(&("line_items[0][price]".to_string(), "price_abc".to_string())));
        assert!(form.contains(&("line_items[0][quantity]".to_string(), "1".to_string())));
        assert!(form.contains(&("mode".to_string(), "payment".to_string())));
    }

    #[test]
    fn session_form_carries_metadata_and_price_data() {
        let intent = intent_for(CheckoutPayload {
            price: Some(dec!(75)),
            name: Some("Basic Consultation".to_string()),
            order_type: Some("service_package".to_string()),
            ..Default::default()
        });
        let form = processor().session_form(&intent);

        assert!(form.contains(&(
            "line_items[0][price_data][unit_amount]".to_string(),
            "7500".to_string()
        )));
        assert!(form.contains(&(
            "metadata[order_type]".to_string(),
            "service_package".to_string()
        )));
        assert!(form
            .iter()
            .any(|(k, _)| k == "metadata[user_id]"));
    }

    #[test]
    fn completed_session_webhook_parses_to_event() {
        let payload = serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_intent": "pi_test_1",
                "payment_status": "paid",
                "amount_total": 3475,
                "currency": "eur",
                "metadata": { "order_type": "cart", "is_anonymous": "true" },
                "customer_details": { "email": "shopper@example.test" }
            }}
        });
        let event = processor()
            .parse_webhook_event(payload.to_string().as_bytes())
            .unwrap()
            .expect("completion event expected");

        assert_eq!(event.payment_intent_id, "pi_test_1");
        assert_eq!(event.amount, dec!(34.75));
        assert_eq!(event.line_item_ref.as_deref(), Some("cs_test_1"));
        assert!(event.is_anonymous());
    }

    #[test]
    fn unrelated_event_types_are_ignored() {
        let payload = serde_json::json!({ "type": "invoice.paid", "data": { "object": {} } });
        let event = processor()
            .parse_webhook_event(payload.to_string().as_bytes())
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn session_id_is_fallback_payment_identifier() {
        let payload = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_2", "amount_total": 500 } }
        });
        let event = processor()
            .parse_webhook_event(payload.to_string().as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(event.payment_intent_id, "cs_test_2");
    }
}
