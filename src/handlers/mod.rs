pub mod auth;
pub mod checkout;
pub mod common;
pub mod delivery;
pub mod payments;

use crate::auth::IdentityService;
use crate::errors::ServiceError;
use crate::payments::{PaymentProcessor, ProcessorKind};
use crate::services::{
    CheckoutService, DeliveryService, NotificationService, ReconciliationService,
};
use crate::AppState;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;

/// Aggregated services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: CheckoutService,
    pub reconciliation: ReconciliationService,
    pub identity: IdentityService,
    pub delivery: DeliveryService,
    pub notifications: Arc<NotificationService>,
    processors: HashMap<ProcessorKind, Arc<dyn PaymentProcessor>>,
}

impl AppServices {
    pub fn new(
        checkout: CheckoutService,
        reconciliation: ReconciliationService,
        identity: IdentityService,
        delivery: DeliveryService,
        notifications: Arc<NotificationService>,
        processors: Vec<Arc<dyn PaymentProcessor>>,
    ) -> Self {
        let processors = processors
            .into_iter()
            .map(|processor| (processor.kind(), processor))
            .collect();
        Self {
            checkout,
            reconciliation,
            identity,
            delivery,
            notifications,
            processors,
        }
    }

    pub fn processor(
        &self,
        kind: ProcessorKind,
    ) -> Result<&Arc<dyn PaymentProcessor>, ServiceError> {
        self.processors.get(&kind).ok_or_else(|| {
            ServiceError::InternalError(format!("processor {} is not configured", kind))
        })
    }

    pub fn processors(&self) -> impl Iterator<Item = &Arc<dyn PaymentProcessor>> {
        self.processors.values()
    }
}

/// Assembles the versioned API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/checkout", checkout::checkout_routes())
        .nest("/payments", payments::payment_routes())
        .nest("/delivery-options", delivery::delivery_routes())
        .nest("/auth", auth::auth_routes())
}
