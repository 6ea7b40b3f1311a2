use crate::domain::session::PaymentState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Gateway rejected the payment request: {0}")]
    GatewayRejected(String),
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),
    #[error("Payment confirmation timed out: {0}")]
    ConfirmationTimeout(String),
    #[error("Status check failed: {0}")]
    TransientPollError(String),
    #[error("Cannot {operation} while payment is {state}")]
    InvalidStateError {
        operation: &'static str,
        state: PaymentState,
    },
    #[error("Payment request was cancelled before the gateway responded")]
    Cancelled,
    #[error("Payment controller is no longer running")]
    ControllerClosed,
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PaymentError {
    /// Whether the error should be shown to the cashier.
    ///
    /// Transient poll failures are recovered by polling again and invalid-state
    /// errors are programming mistakes in the host, so neither is surfaced.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_)
                | Self::GatewayRejected(_)
                | Self::PaymentDeclined(_)
                | Self::ConfirmationTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
