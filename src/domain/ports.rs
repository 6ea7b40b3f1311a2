use super::payment::{Amount, CheckoutReference, PhoneNumber, PushAccepted, SaleRef, StatusReport};
use super::session::SessionView;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Client side of the mobile-money gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Sends one push request. Errors are reported as `GatewayRejected`.
    async fn push(
        &self,
        phone: &PhoneNumber,
        amount: Amount,
        sale_ref: &SaleRef,
    ) -> Result<PushAccepted>;

    /// Queries the status of a checkout. Safe to call repeatedly.
    async fn check_status(&self, checkout_reference: &CheckoutReference) -> Result<StatusReport>;
}

/// Receiver of session lifecycle notifications.
///
/// Calls are made from the controller task and must not block.
pub trait HostUi: Send + Sync {
    /// Called whenever the session changes.
    fn render(&self, view: &SessionView);

    /// Called once the post-success settling delay has elapsed.
    fn proceed(&self, view: &SessionView);

    /// Called for user-visible errors raised by an operation.
    fn notify_error(&self, error: &PaymentError);
}

pub type GatewayBox = Arc<dyn PaymentGateway>;
pub type HostUiBox = Arc<dyn HostUi>;
