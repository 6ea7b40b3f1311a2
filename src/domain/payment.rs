use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places in the currency's minor unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A positive amount to collect, with at most minor-unit precision.
///
/// Wraps `rust_decimal::Decimal` so a zero, negative, or sub-cent amount can
/// never reach the gateway.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if value.round_dp(MINOR_UNIT_SCALE) != value {
            return Err(PaymentError::ValidationError(format!(
                "Amount must have at most {MINOR_UNIT_SCALE} decimal places"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The payer's phone number, trimmed and guaranteed non-empty.
///
/// Normalisation to the MSISDN format is left to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(raw: &str) -> Result<Self, PaymentError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::ValidationError(
                "Enter a phone number".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to the sale being paid for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleRef(pub String);

impl fmt::Display for SaleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the gateway assigns to an accepted push request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutReference(pub String);

impl fmt::Display for CheckoutReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input to a single initiation attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    phone: PhoneNumber,
    amount: Amount,
    sale_ref: SaleRef,
}

impl PaymentRequest {
    /// Validates the raw inputs. No network call is made on failure.
    pub fn new(
        phone: &str,
        amount: Decimal,
        sale_ref: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        Ok(Self {
            phone: PhoneNumber::new(phone)?,
            amount: Amount::new(amount)?,
            sale_ref: SaleRef(sale_ref.into()),
        })
    }

    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn sale_ref(&self) -> &SaleRef {
        &self.sale_ref
    }
}

/// The gateway's answer to an accepted push request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAccepted {
    pub checkout_reference: CheckoutReference,
    pub prompt_message: Option<String>,
}

/// Status word reported by the gateway for a checkout.
///
/// Anything the client does not recognise is treated as still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Success,
    Failed,
    Cancelled,
    #[serde(other)]
    Pending,
}

/// One status-check result.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: GatewayStatus,
    pub receipt_reference: Option<String>,
    pub reason_text: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: GatewayStatus::Pending,
            receipt_reference: None,
            reason_text: None,
        }
    }
}
