//! Order confirmation dispatch.
//!
//! Sends a customer confirmation and an internal admin alert per completed
//! order, selecting the template by order type. Every send is individually
//! guarded: a failed email is logged and dropped, it never affects order
//! persistence or the processor-facing response.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::entities::order::{OrderType, Model as OrderModel};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("message build error: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outgoing plain-text message.
#[derive(Debug, Clone)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Mail delivery seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotificationError>;
}

/// SMTP mailer over an async STARTTLS transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotificationError::Transport(e.to_string()))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), NotificationError> {
        let message = Message::builder()
            .from(email
                .from
                .parse()
                .map_err(|_| NotificationError::InvalidAddress(email.from.clone()))?)
            .to(email
                .to
                .parse()
                .map_err(|_| NotificationError::InvalidAddress(email.to.clone()))?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.text.clone())
            .map_err(|e| NotificationError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| NotificationError::Transport(e.to_string()))
    }
}

/// Development mailer: logs the message instead of delivering it.
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<(), NotificationError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            "console mailer:\n{}",
            email.text
        );
        Ok(())
    }
}

/// Line item view rendered into the confirmation tables. Built by the
/// reconciler from persisted data plus the processor-extracted names.
#[derive(Debug, Clone)]
pub struct OrderLineView {
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
}

pub struct NotificationService {
    mailer: Arc<dyn Mailer>,
    from: String,
    admin_email: String,
}

impl NotificationService {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>, admin_email: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
            admin_email: admin_email.into(),
        }
    }

    /// Sends the customer confirmation (when a recipient is known) and the
    /// admin alert. Fire-and-forget: each failure is logged per recipient and
    /// swallowed.
    pub async fn dispatch(
        &self,
        order: &OrderModel,
        items: &[OrderLineView],
        recipient: Option<&str>,
    ) {
        if let Some(recipient) = recipient {
            let (subject, text) = self.customer_message(order, items);
            self.try_send(Email {
                from: self.from.clone(),
                to: recipient.to_string(),
                subject,
                text,
            })
            .await;
        } else {
            info!(order_id = %order.id, "no customer email on order, skipping confirmation");
        }

        let (subject, text) = self.admin_message(order, items);
        self.try_send(Email {
            from: self.from.clone(),
            to: self.admin_email.clone(),
            subject,
            text,
        })
        .await;
    }

    async fn try_send(&self, email: Email) {
        let to = email.to.clone();
        if let Err(e) = self.mailer.send(&email).await {
            warn!(recipient = %to, "notification send failed: {}", e);
        }
    }

    fn customer_message(&self, order: &OrderModel, items: &[OrderLineView]) -> (String, String) {
        match order.order_type {
            OrderType::ServicePackage => {
                let package = items
                    .first()
                    .map(|item| item.name.clone())
                    .unwrap_or_else(|| "your booking".to_string());
                (
                    format!("Booking confirmed: {}", package),
                    format!(
                        "Thank you for your booking!\n\n{}\n\nTotal paid: {:.2} {}\nReference: {}\n\n\
                         We will reach out shortly to schedule.",
                        render_item_table(items),
                        order.total,
                        order_currency(order),
                        order.id,
                    ),
                )
            }
            OrderType::Cart => (
                "Your order confirmation".to_string(),
                format!(
                    "Thank you for your order!\n\n{}\nTotal paid: {:.2} {}\nOrder number: {}\n\n\
                     You will receive a shipping notification once your order is on its way.",
                    render_item_table(items),
                    order.total,
                    order_currency(order),
                    order.id,
                ),
            ),
        }
    }

    fn admin_message(&self, order: &OrderModel, items: &[OrderLineView]) -> (String, String) {
        let kind = match order.order_type {
            OrderType::Cart => "Shop order",
            OrderType::ServicePackage => "Service package booking",
        };
        (
            format!("{}: {:.2} {}", kind, order.total, order_currency(order)),
            format!(
                "{kind} received.\n\nOrder: {}\nUser: {}{}\nPayment: {} / {}\n\n{}\nTotal: {:.2} {}",
                order.id,
                order.user_id,
                if order.is_anonymous_order {
                    " (anonymous)"
                } else {
                    ""
                },
                order.payment_method,
                order.payment_intent_id,
                render_item_table(items),
                order.total,
                order_currency(order),
            ),
        )
    }
}

fn render_item_table(items: &[OrderLineView]) -> String {
    let mut table = String::new();
    for item in items {
        table.push_str(&format!(
            "  {} x {} — {:.2}\n",
            item.quantity, item.name, item.price
        ));
    }
    table
}

fn order_currency(order: &OrderModel) -> String {
    order
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("currency"))
        .and_then(|value| value.as_str())
        .unwrap_or("eur")
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::entities::order::OrderStatus;

    /// Captures sends; optionally fails every delivery.
    struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<(), NotificationError> {
            if self.fail {
                return Err(NotificationError::Transport("connection refused".into()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn order(order_type: OrderType) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total: dec!(34.75),
            status: OrderStatus::Completed,
            payment_method: "stripe".to_string(),
            payment_intent_id: "pi_1".to_string(),
            order_type,
            metadata: Some(serde_json::json!({"currency": "eur"})),
            is_anonymous_order: false,
            created_at: Utc::now(),
        }
    }

    fn service(fail: bool) -> (NotificationService, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer {
            sent: Mutex::new(Vec::new()),
            fail,
        });
        let service = NotificationService::new(
            mailer.clone(),
            "shop@example.test",
            "orders@example.test",
        );
        (service, mailer)
    }

    #[tokio::test]
    async fn dispatch_sends_customer_and_admin_messages() {
        let (service, mailer) = service(false);
        let items = vec![OrderLineView {
            name: "Mug".to_string(),
            quantity: 2,
            price: dec!(10),
        }];

        service
            .dispatch(&order(OrderType::Cart), &items, Some("shopper@example.test"))
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "shopper@example.test");
        assert_eq!(sent[1].to, "orders@example.test");
        assert!(sent[0].text.contains("2 x Mug"));
    }

    #[tokio::test]
    async fn missing_recipient_still_alerts_admin() {
        let (service, mailer) = service(false);
        service.dispatch(&order(OrderType::Cart), &[], None).await;

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "orders@example.test");
    }

    #[tokio::test]
    async fn service_package_template_names_the_package() {
        let (service, mailer) = service(false);
        let items = vec![OrderLineView {
            name: "Basic Consultation".to_string(),
            quantity: 1,
            price: dec!(75),
        }];

        service
            .dispatch(
                &order(OrderType::ServicePackage),
                &items,
                Some("shopper@example.test"),
            )
            .await;

        let sent = mailer.sent.lock().unwrap();
        assert!(sent[0].subject.contains("Basic Consultation"));
        assert!(sent[1].subject.starts_with("Service package booking"));
    }

    #[tokio::test]
    async fn transport_failures_are_swallowed() {
        let (service, _mailer) = service(true);
        // Must not panic or propagate.
        service
            .dispatch(&order(OrderType::Cart), &[], Some("shopper@example.test"))
            .await;
    }
}
