//! Wire format of the POS backend's M-Pesa endpoints.
//!
//! `POST {base}/mpesa/stk-push/` takes a `StkPushBody` and answers with a
//! `StkPushReply`; `GET {base}/mpesa/status/{checkout_id}/` answers with a
//! `StatusReply`.

use crate::domain::payment::{
    Amount, CheckoutReference, GatewayStatus, PhoneNumber, PushAccepted, SaleRef, StatusReport,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct StkPushBody<'a> {
    pub phone_number: &'a str,
    pub amount: Decimal,
    pub sale_id: &'a str,
}

impl<'a> StkPushBody<'a> {
    pub fn new(phone: &'a PhoneNumber, amount: Amount, sale_ref: &'a SaleRef) -> Self {
        Self {
            phone_number: phone.as_str(),
            amount: amount.value(),
            sale_id: &sale_ref.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StkPushReply {
    pub checkout_request_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<StkPushReply> for PushAccepted {
    fn from(reply: StkPushReply) -> Self {
        Self {
            checkout_reference: CheckoutReference(reply.checkout_request_id),
            prompt_message: reply.message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusReply {
    pub status: GatewayStatus,
    #[serde(default)]
    pub mpesa_receipt_number: Option<String>,
    #[serde(default)]
    pub result_description: Option<String>,
}

impl From<StatusReply> for StatusReport {
    fn from(reply: StatusReply) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        Self {
            status: reply.status,
            receipt_reference: non_empty(reply.mpesa_receipt_number),
            reason_text: non_empty(reply.result_description),
        }
    }
}

/// Extracts a readable message from an error response body.
///
/// Tries, in order: a bare JSON string, `detail`, `error`, the first entry of
/// `non_field_errors`, then `"<key>: <value>"` for the first field. A body
/// that is not JSON is returned as-is when non-empty.
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            let trimmed = body.trim();
            return (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
    };

    match &value {
        Value::String(s) => return Some(s.clone()),
        Value::Object(_) => {}
        _ => return None,
    }

    for key in ["detail", "error"] {
        if let Some(text) = value.get(key).and_then(scalar_text) {
            return Some(text);
        }
    }
    if let Some(first) = value
        .get("non_field_errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(scalar_text)
    {
        return Some(first);
    }

    let (key, field) = value.as_object()?.iter().next()?;
    let field = match field {
        Value::Array(items) => items.first()?,
        other => other,
    };
    Some(format!("{key}: {}", scalar_text(field)?))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
