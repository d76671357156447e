pub mod checkout;
pub mod delivery;
pub mod notifications;
pub mod reconciliation;

pub use checkout::CheckoutService;
pub use delivery::DeliveryService;
pub use notifications::NotificationService;
pub use reconciliation::{ReconciliationOutcome, ReconciliationService};
