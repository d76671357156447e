//! Test harness: application state over in-memory SQLite, with fakes at the
//! processor, directory, and mailer seams.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    auth::{DirectoryError, IdentityDirectory, IdentityService, SessionInfo},
    config::AppConfig,
    db,
    errors::ServiceError,
    events::EventSender,
    handlers::AppServices,
    payments::{
        CheckoutHandle, CheckoutIntent, CompletionEvent, ExtractedLineItem, PaymentProcessor,
        ProcessorKind,
    },
    services::{
        notifications::{Email, Mailer, NotificationError},
        CheckoutService, DeliveryService, NotificationService, ReconciliationService,
    },
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Identity directory double: no existing sessions, accepts any non-empty
/// challenge token.
pub struct FakeDirectory;

#[async_trait]
impl IdentityDirectory for FakeDirectory {
    async fn current_session(&self, _bearer: &str) -> Result<Option<SessionInfo>, DirectoryError> {
        Ok(None)
    }

    async fn create_anonymous_session(
        &self,
        challenge_token: &str,
    ) -> Result<SessionInfo, DirectoryError> {
        if challenge_token.is_empty() {
            return Err(DirectoryError::new("challenge token rejected"));
        }
        Ok(SessionInfo {
            user_id: Uuid::new_v4(),
            email: None,
            is_anonymous: true,
        })
    }

    async fn link_email(
        &self,
        _user_id: Uuid,
        _email: &str,
        _redirect_url: &str,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn link_provider(
        &self,
        _user_id: Uuid,
        provider: &str,
        _redirect_url: &str,
    ) -> Result<String, DirectoryError> {
        Ok(format!("https://provider.test/authorize/{}", provider))
    }
}

/// Processor double. Webhook payloads use the shape
/// `{"fake_processor": "stripe", "payment_intent_id": ..., "amount": ...,
///   "metadata": {...}}` and are only parsed by the matching kind.
pub struct FakeProcessor {
    kind: ProcessorKind,
    line_items: Mutex<Vec<ExtractedLineItem>>,
    capture_event: Mutex<Option<CompletionEvent>>,
    fail_line_items: bool,
}

impl FakeProcessor {
    pub fn new(kind: ProcessorKind) -> Self {
        Self {
            kind,
            line_items: Mutex::new(Vec::new()),
            capture_event: Mutex::new(None),
            fail_line_items: false,
        }
    }

    pub fn with_line_items(self, items: Vec<ExtractedLineItem>) -> Self {
        *self.line_items.lock().unwrap() = items;
        self
    }

    pub fn with_capture_event(self, event: CompletionEvent) -> Self {
        *self.capture_event.lock().unwrap() = Some(event);
        self
    }

    pub fn failing_line_items(mut self) -> Self {
        self.fail_line_items = true;
        self
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    fn kind(&self) -> ProcessorKind {
        self.kind
    }

    async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
    ) -> Result<CheckoutHandle, ServiceError> {
        Ok(CheckoutHandle {
            session_id: format!("sess_{}", self.kind),
            url: Some(format!(
                "https://{}.test/redirect?lines={}",
                self.kind,
                intent.line_items.len()
            )),
        })
    }

    async fn capture(&self, order_ref: &str) -> Result<CompletionEvent, ServiceError> {
        self.capture_event
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ServiceError::ProcessorError(format!("unknown order {}", order_ref)))
    }

    async fn line_items(
        &self,
        _payment_ref: &str,
    ) -> Result<Vec<ExtractedLineItem>, ServiceError> {
        if self.fail_line_items {
            return Err(ServiceError::ProcessorError("listing unavailable".into()));
        }
        Ok(self.line_items.lock().unwrap().clone())
    }

    fn parse_webhook_event(
        &self,
        payload: &[u8],
    ) -> Result<Option<CompletionEvent>, ServiceError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if json.get("fake_processor").and_then(Value::as_str) != Some(self.kind.as_str()) {
            return Ok(None);
        }

        let metadata: HashMap<String, String> = json
            .get("metadata")
            .cloned()
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or_default();

        Ok(Some(CompletionEvent {
            payment_intent_id: json
                .get("payment_intent_id")
                .and_then(Value::as_str)
                .unwrap_or("pi_unknown")
                .to_string(),
            amount: json
                .get("amount")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO),
            currency: "eur".to_string(),
            processor: self.kind,
            customer_email: json
                .get("customer_email")
                .and_then(Value::as_str)
                .map(str::to_string),
            metadata,
            line_item_ref: Some("ref_1".to_string()),
        }))
    }
}

/// Captures every accepted send.
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_processors(vec![
            Arc::new(FakeProcessor::new(ProcessorKind::Stripe)),
            Arc::new(FakeProcessor::new(ProcessorKind::Paypal)),
        ])
        .await
    }

    pub async fn with_processors(processors: Vec<Arc<FakeProcessor>>) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.stripe.webhook_secret = WEBHOOK_SECRET.to_string();
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (event_tx, mut event_rx) = mpsc::channel(64);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        let event_sender = EventSender::new(event_tx);
        let event_sender_arc = Arc::new(event_sender.clone());

        let identity = IdentityService::new(Arc::new(FakeDirectory));
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
        });
        let notifications = Arc::new(NotificationService::new(
            mailer.clone(),
            "shop@example.test",
            "orders@example.test",
        ));

        let checkout = CheckoutService::new(
            identity.clone(),
            event_sender_arc.clone(),
            cfg.currency.clone(),
            cfg.allow_anonymous_checkout,
        );
        let reconciliation =
            ReconciliationService::new(db.clone(), event_sender_arc, notifications.clone());
        let delivery = DeliveryService::new(db.clone());

        let services = AppServices::new(
            checkout,
            reconciliation,
            identity,
            delivery,
            notifications,
            processors
                .into_iter()
                .map(|p| p as Arc<dyn PaymentProcessor>)
                .collect(),
        );

        let state = Arc::new(AppState {
            db,
            config: cfg,
            event_sender,
            services,
        });

        Self {
            router: storefront_api::app(state.clone()),
            state,
            mailer,
        }
    }

    /// Sends a request through the router and returns status + JSON body.
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
