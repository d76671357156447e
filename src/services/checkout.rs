//! Checkout initiation.
//!
//! Resolves the shopper's identity, discriminates the request into one of
//! the three checkout shapes, builds the processor-agnostic intent and hands
//! it to the selected processor. Exactly one processor call per attempt; a
//! failure surfaces to the shopper, who may retry manually.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::auth::{Identity, IdentityService};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{
    CheckoutHandle, CheckoutInput, CheckoutIntent, CheckoutPayload, PaymentProcessor,
};

#[derive(Clone)]
pub struct CheckoutService {
    identity: IdentityService,
    event_sender: Arc<EventSender>,
    default_currency: String,
    allow_anonymous: bool,
}

impl CheckoutService {
    pub fn new(
        identity: IdentityService,
        event_sender: Arc<EventSender>,
        default_currency: impl Into<String>,
        allow_anonymous: bool,
    ) -> Self {
        Self {
            identity,
            event_sender,
            default_currency: default_currency.into(),
            allow_anonymous,
        }
    }

    /// Runs one checkout attempt end to end and returns the processor's
    /// redirect handle together with the identity that will own the order.
    #[instrument(skip_all, fields(processor = %processor.kind()))]
    pub async fn start_checkout(
        &self,
        payload: CheckoutPayload,
        processor: &dyn PaymentProcessor,
        bearer: Option<&str>,
        challenge_token: Option<&str>,
    ) -> Result<(CheckoutHandle, Identity), ServiceError> {
        let identity = self
            .identity
            .resolve_identity(self.allow_anonymous, bearer, challenge_token)
            .await?;

        let requested_currency = payload.currency.clone();
        let input = CheckoutInput::resolve(payload)?;
        let intent =
            CheckoutIntent::build(input, &identity, &self.default_currency, requested_currency)?;

        let handle = processor.create_checkout_session(&intent).await?;

        info!(
            user_id = %identity.user_id,
            session_id = %handle.session_id,
            "checkout session created"
        );
        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                user_id: identity.user_id,
                processor: processor.kind().to_string(),
            })
            .await;

        Ok((handle, identity))
    }
}
