//! Completed-payment reconciliation.
//!
//! Both completion paths (signed webhook, synchronous capture) funnel into
//! [`ReconciliationService::reconcile`], which runs the per-payment state
//! machine: idempotency gate, order-type derivation, processor line-item
//! re-read, best-effort persistence, notification dispatch. Exactly one
//! order may ever exist per `payment_intent_id`; the table's unique index
//! backstops the lookup/insert race between concurrent deliveries.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, SqlErr,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, OrderType};
use crate::entities::order_item;
use crate::entities::Order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{CompletionEvent, ExtractedLineItem, PaymentProcessor};
use crate::services::notifications::{NotificationService, OrderLineView};

/// Result of reconciling one completion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// A new order was persisted.
    Created { order_id: Uuid },
    /// An order for this payment already existed; nothing was written.
    Duplicate { order_id: Uuid },
}

impl ReconciliationOutcome {
    pub fn order_id(&self) -> Uuid {
        match self {
            ReconciliationOutcome::Created { order_id }
            | ReconciliationOutcome::Duplicate { order_id } => *order_id,
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifications: Arc<NotificationService>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifications,
        }
    }

    /// Processes a verified completion event. Duplicate deliveries
    /// short-circuit to success; partial persistence failures are made
    /// observable but never bubble up as a processor-facing error.
    #[instrument(skip(self, event, processor), fields(payment_intent_id = %event.payment_intent_id))]
    pub async fn reconcile(
        &self,
        event: CompletionEvent,
        processor: &dyn PaymentProcessor,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        // Idempotency gate: processors do not guarantee exactly-once
        // delivery, so look before writing anything.
        if let Some(existing) = self.find_existing(&event.payment_intent_id).await? {
            info!(order_id = %existing.id, "duplicate completion event ignored");
            self.event_sender
                .send_or_log(Event::DuplicatePaymentIgnored {
                    payment_intent_id: event.payment_intent_id.clone(),
                })
                .await;
            return Ok(ReconciliationOutcome::Duplicate {
                order_id: existing.id,
            });
        }

        let order_type = event.order_type();

        // Re-read the actual line items from the processor; whatever the
        // shopper's browser claimed is not trusted for persistence.
        let extracted = match &event.line_item_ref {
            Some(reference) => match processor.line_items(reference).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("line item extraction failed, falling back to metadata: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let user_id = event.user_id().unwrap_or_else(|| {
            warn!("completion event carries no user id, recording as nil user");
            Uuid::nil()
        });

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            total: Set(event.amount),
            status: Set(OrderStatus::Completed),
            payment_method: Set(event.processor.to_string()),
            payment_intent_id: Set(event.payment_intent_id.clone()),
            order_type: Set(order_type),
            metadata: Set(serde_json::to_value(&event.metadata).ok()),
            is_anonymous_order: Set(event.is_anonymous()),
            created_at: Set(Utc::now()),
        };

        let order = match order_model.insert(&*self.db).await {
            Ok(order) => order,
            Err(e) if is_unique_violation(&e) => {
                // Lost the insert race against a concurrent delivery of the
                // same payment; identical outcome to the early gate.
                info!("concurrent reconciliation won the insert, treating as duplicate");
                let existing = self
                    .find_existing(&event.payment_intent_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(
                            "unique violation without a matching order row".to_string(),
                        )
                    })?;
                self.event_sender
                    .send_or_log(Event::DuplicatePaymentIgnored {
                        payment_intent_id: event.payment_intent_id.clone(),
                    })
                    .await;
                return Ok(ReconciliationOutcome::Duplicate {
                    order_id: existing.id,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let line_views = self
            .persist_order_items(&order, order_type, &event, extracted)
            .await;

        // Notification is attempted regardless of how persistence went;
        // failures are logged inside the dispatcher, never propagated.
        self.notifications
            .dispatch(&order, &line_views, event.customer_email.as_deref())
            .await;

        Ok(ReconciliationOutcome::Created { order_id })
    }

    async fn find_existing(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    /// Writes the order items sequentially (best effort, no transaction). A
    /// failed item write leaves the order flagged `items_missing` so the gap
    /// is visible for manual reconciliation instead of silently dropped.
    async fn persist_order_items(
        &self,
        order: &order::Model,
        order_type: OrderType,
        event: &CompletionEvent,
        extracted: Vec<ExtractedLineItem>,
    ) -> Vec<OrderLineView> {
        let rows = derive_item_rows(order, order_type, event, extracted);

        let mut failed = false;
        for (model, _) in &rows {
            if let Err(e) = model.clone().insert(&*self.db).await {
                error!(
                    order_id = %order.id,
                    "order item write failed, order flagged for manual reconciliation: {}",
                    e
                );
                failed = true;
                break;
            }
        }

        if failed {
            let mut update: order::ActiveModel = order.clone().into();
            update.status = Set(OrderStatus::ItemsMissing);
            if let Err(e) = update.update(&*self.db).await {
                error!(order_id = %order.id, "failed to flag order as items_missing: {}", e);
            }
            self.event_sender
                .send_or_log(Event::OrderItemsMissing(order.id))
                .await;
        } else {
            self.event_sender
                .send_or_log(Event::OrderCreated(order.id))
                .await;
        }

        rows.into_iter().map(|(_, view)| view).collect()
    }
}

/// Derives the order-item rows and their email views.
///
/// Service packages always persist exactly one row, using the first
/// extracted line or, when extraction yielded nothing, the metadata fallback
/// of quantity 1 at the paid amount. Cart orders persist one row per
/// extracted line, with the linked product id when the processor echoes one.
fn derive_item_rows(
    order: &order::Model,
    order_type: OrderType,
    event: &CompletionEvent,
    extracted: Vec<ExtractedLineItem>,
) -> Vec<(order_item::ActiveModel, OrderLineView)> {
    let make_row = |product_id: Option<Uuid>, quantity: i32, price: Decimal, name: String| {
        (
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                price: Set(price),
            },
            OrderLineView {
                name,
                quantity,
                price,
            },
        )
    };

    match order_type {
        OrderType::ServicePackage => {
            let (name, quantity, price) = match extracted.into_iter().next() {
                Some(line) => (line.name, line.quantity, line.unit_price),
                None => (
                    event
                        .package_name()
                        .unwrap_or("Service package")
                        .to_string(),
                    1,
                    event.amount,
                ),
            };
            vec![make_row(None, quantity, price, name)]
        }
        OrderType::Cart => extracted
            .into_iter()
            .map(|line| make_row(line.product_id, line.quantity, line.unit_price, line.name))
            .collect(),
    }
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::ProcessorKind;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn order_row(order_type: OrderType) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            total: dec!(75),
            status: OrderStatus::Completed,
            payment_method: "stripe".to_string(),
            payment_intent_id: "pi_1".to_string(),
            order_type,
            metadata: None,
            is_anonymous_order: false,
            created_at: Utc::now(),
        }
    }

    fn completion(metadata: &[(&str, &str)]) -> CompletionEvent {
        CompletionEvent {
            payment_intent_id: "pi_1".to_string(),
            amount: dec!(75),
            currency: "eur".to_string(),
            processor: ProcessorKind::Stripe,
            customer_email: None,
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            line_item_ref: None,
        }
    }

    #[test]
    fn service_package_without_extraction_falls_back_to_metadata() {
        let order = order_row(OrderType::ServicePackage);
        let event = completion(&[("package_name", "Basic Consultation")]);

        let rows = derive_item_rows(&order, OrderType::ServicePackage, &event, Vec::new());
        assert_eq!(rows.len(), 1);

        let (model, view) = &rows[0];
        assert_eq!(view.name, "Basic Consultation");
        assert_eq!(view.quantity, 1);
        assert_eq!(view.price, dec!(75));
        assert_eq!(*model.product_id.as_ref(), None);
    }

    #[test]
    fn service_package_keeps_only_first_extracted_line() {
        let order = order_row(OrderType::ServicePackage);
        let event = completion(&[]);
        let extracted = vec![
            ExtractedLineItem {
                name: "Premium Consultation".to_string(),
                quantity: 1,
                unit_price: dec!(150),
                product_id: None,
            },
            ExtractedLineItem {
                name: "Stray line".to_string(),
                quantity: 1,
                unit_price: dec!(1),
                product_id: None,
            },
        ];

        let rows = derive_item_rows(&order, OrderType::ServicePackage, &event, extracted);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.name, "Premium Consultation");
        // product_id stays unset even if extraction linked one.
        assert_eq!(*rows[0].0.product_id.as_ref(), None);
    }

    #[test]
    fn cart_order_persists_one_row_per_extracted_line() {
        let order = order_row(OrderType::Cart);
        let event = completion(&[]);
        let linked = Uuid::new_v4();
        let extracted = vec![
            ExtractedLineItem {
                name: "Mug".to_string(),
                quantity: 2,
                unit_price: dec!(10),
                product_id: Some(linked),
            },
            ExtractedLineItem {
                name: "Tax".to_string(),
                quantity: 1,
                unit_price: dec!(4.75),
                product_id: None,
            },
        ];

        let rows = derive_item_rows(&order, OrderType::Cart, &event, extracted);
        assert_eq!(rows.len(), 2);
        assert_eq!(*rows[0].0.product_id.as_ref(), Some(linked));
        assert_eq!(*rows[1].0.product_id.as_ref(), None);
        assert_eq!(rows[1].1.price, dec!(4.75));
    }
}
