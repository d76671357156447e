mod common;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{FakeProcessor, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use storefront_api::{
    entities::{order::OrderStatus, Order, OrderItem},
    payments::{webhook::sign_payload, CompletionEvent, ExtractedLineItem, ProcessorKind},
    services::ReconciliationOutcome,
};

fn completion_event(
    payment_intent_id: &str,
    amount: rust_decimal::Decimal,
    metadata: &[(&str, &str)],
) -> CompletionEvent {
    CompletionEvent {
        payment_intent_id: payment_intent_id.to_string(),
        amount,
        currency: "eur".to_string(),
        processor: ProcessorKind::Stripe,
        customer_email: Some("shopper@example.test".to_string()),
        metadata: metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        line_item_ref: Some("ref_1".to_string()),
    }
}

#[tokio::test]
async fn same_completion_event_creates_exactly_one_order() {
    let user_id = Uuid::new_v4().to_string();
    let processor = Arc::new(FakeProcessor::new(ProcessorKind::Stripe).with_line_items(vec![
        ExtractedLineItem {
            name: "Mug".to_string(),
            quantity: 2,
            unit_price: dec!(10),
            product_id: Some(Uuid::new_v4()),
        },
    ]));
    let app = TestApp::with_processors(vec![processor.clone()]).await;

    let event = completion_event("pi_dup", dec!(20), &[("user_id", user_id.as_str())]);

    let first = app
        .state
        .services
        .reconciliation
        .reconcile(event.clone(), processor.as_ref())
        .await
        .unwrap();
    assert!(matches!(first, ReconciliationOutcome::Created { .. }));

    let emails_after_first = app.mailer.sent.lock().unwrap().len();

    let second = app
        .state
        .services
        .reconciliation
        .reconcile(event, processor.as_ref())
        .await
        .unwrap();
    assert_eq!(
        second,
        ReconciliationOutcome::Duplicate {
            order_id: first.order_id()
        }
    );

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    let items = OrderItem::find().all(&*app.state.db).await.unwrap();
    assert_eq!(items.len(), 1);

    // The duplicate short-circuits before notification.
    assert_eq!(app.mailer.sent.lock().unwrap().len(), emails_after_first);
}

#[tokio::test]
async fn service_package_without_extracted_lines_gets_fallback_item() {
    let processor = Arc::new(FakeProcessor::new(ProcessorKind::Stripe));
    let app = TestApp::with_processors(vec![processor.clone()]).await;

    let event = completion_event(
        "pi_package",
        dec!(75),
        &[
            ("order_type", "service_package"),
            ("package_name", "Basic Consultation"),
        ],
    );

    app.state
        .services
        .reconciliation
        .reconcile(event, processor.as_ref())
        .await
        .unwrap();

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total, dec!(75));

    let items = OrderItem::find().all(&*app.state.db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 1);
    assert_eq!(items[0].price, dec!(75));
    assert_eq!(items[0].product_id, None);

    // The customer confirmation names the package.
    let sent = app.mailer.sent.lock().unwrap();
    assert!(sent
        .iter()
        .any(|email| email.subject.contains("Basic Consultation")));
}

#[tokio::test]
async fn cart_order_persists_one_item_per_extracted_line() {
    let linked = Uuid::new_v4();
    let processor = Arc::new(FakeProcessor::new(ProcessorKind::Stripe).with_line_items(vec![
        ExtractedLineItem {
            name: "Mug".to_string(),
            quantity: 2,
            unit_price: dec!(10),
            product_id: Some(linked),
        },
        ExtractedLineItem {
            name: "Poster".to_string(),
            quantity: 1,
            unit_price: dec!(5),
            product_id: None,
        },
        ExtractedLineItem {
            name: "Tax".to_string(),
            quantity: 1,
            unit_price: dec!(4.75),
            product_id: None,
        },
    ]));
    let app = TestApp::with_processors(vec![processor.clone()]).await;

    let event = completion_event("pi_cart", dec!(34.75), &[("is_anonymous", "true")]);

    app.state
        .services
        .reconciliation
        .reconcile(event, processor.as_ref())
        .await
        .unwrap();

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert!(orders[0].is_anonymous_order);
    assert_eq!(orders[0].status, OrderStatus::Completed);

    let mut items = OrderItem::find().all(&*app.state.db).await.unwrap();
    items.sort_by(|a, b| b.quantity.cmp(&a.quantity).then(a.price.cmp(&b.price)));
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].product_id, Some(linked));
    assert!(items[1..].iter().all(|item| item.product_id.is_none()));
}

#[tokio::test]
async fn failed_extraction_still_creates_the_order() {
    let processor =
        Arc::new(FakeProcessor::new(ProcessorKind::Stripe).failing_line_items());
    let app = TestApp::with_processors(vec![processor.clone()]).await;

    let event = completion_event(
        "pi_noextract",
        dec!(75),
        &[("order_type", "service_package")],
    );

    let outcome = app
        .state
        .services
        .reconciliation
        .reconcile(event, processor.as_ref())
        .await
        .unwrap();
    assert!(matches!(outcome, ReconciliationOutcome::Created { .. }));

    // Fallback item derived from the payment metadata.
    let items = OrderItem::find().all(&*app.state.db).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].price, dec!(75));
}

#[tokio::test]
async fn unsigned_webhook_is_rejected_without_side_effects() {
    let app = TestApp::new().await;

    let payload = serde_json::json!({
        "fake_processor": "stripe",
        "payment_intent_id": "pi_unsigned",
        "amount": "10.00"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let (status, body) = app.request(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error_code"].as_str(),
        Some("signature_verification_failed")
    );

    assert!(Order::find().all(&*app.state.db).await.unwrap().is_empty());
    assert!(app.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn signed_webhook_creates_order_and_tolerates_replay() {
    let user_id = Uuid::new_v4().to_string();
    let app = TestApp::new().await;

    let payload = serde_json::json!({
        "fake_processor": "stripe",
        "payment_intent_id": "pi_webhook",
        "amount": "34.75",
        "customer_email": "shopper@example.test",
        "metadata": { "user_id": user_id }
    })
    .to_string();

    let ts = chrono::Utc::now().timestamp();
    let signature = sign_payload(ts, payload.as_bytes(), WEBHOOK_SECRET);

    for _ in 0..2 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("Stripe-Signature", format!("t={},v1={}", ts, signature))
            .body(Body::from(payload.clone()))
            .unwrap();

        let (status, body) = app.request(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"].as_bool(), Some(true));
    }

    let orders = Order::find().all(&*app.state.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_intent_id, "pi_webhook");
    assert_eq!(orders[0].total, dec!(34.75));
}

#[tokio::test]
async fn signed_webhook_with_unknown_event_shape_still_acks() {
    let app = TestApp::new().await;

    let payload = serde_json::json!({ "something": "else" }).to_string();
    let ts = chrono::Utc::now().timestamp();
    let signature = sign_payload(ts, payload.as_bytes(), WEBHOOK_SECRET);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .header("x-timestamp", ts.to_string())
        .header("x-signature", signature)
        .body(Body::from(payload))
        .unwrap();

    let (status, body) = app.request(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"].as_bool(), Some(true));
    assert!(Order::find().all(&*app.state.db).await.unwrap().is_empty());
}

#[tokio::test]
async fn capture_reconciles_and_reports_duplicates() {
    let user_id = Uuid::new_v4().to_string();
    let capture_event = CompletionEvent {
        payment_intent_id: "cap_1".to_string(),
        amount: dec!(28.80),
        currency: "eur".to_string(),
        processor: ProcessorKind::Paypal,
        customer_email: Some("shopper@example.test".to_string()),
        metadata: HashMap::from([("user_id".to_string(), user_id)]),
        line_item_ref: Some("ref_1".to_string()),
    };
    let paypal = Arc::new(
        FakeProcessor::new(ProcessorKind::Paypal).with_capture_event(capture_event),
    );
    let app = TestApp::with_processors(vec![paypal]).await;

    let body = serde_json::json!({ "order_id": "5O190127TN364715T", "processor": "paypal" });

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/capture")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, response) = app.request(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"].as_bool(), Some(true));
    assert_eq!(response["status"].as_str(), Some("completed"));
    assert_eq!(response["amount"].as_str(), Some("28.80"));

    // A webhook landing after the capture, or a second capture call, must
    // not create a second order.
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/capture")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, response) = app.request(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"].as_str(), Some("already_processed"));

    assert_eq!(Order::find().all(&*app.state.db).await.unwrap().len(), 1);
}
