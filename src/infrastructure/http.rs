use super::backend_api::{self, StatusReply, StkPushBody, StkPushReply};
use crate::domain::payment::{
    Amount, CheckoutReference, PhoneNumber, PushAccepted, SaleRef, StatusReport,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, header};
use std::time::Duration;
use tracing::{debug, error};

/// Request timeout applied to every call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Payment gateway backed by the POS backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::ValidationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Turns a non-2xx response into the backend's error text.
    async fn failure_text(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("Gateway call failed: {} - {}", status, body);
        backend_api::error_message(&body).unwrap_or_else(|| status.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn push(
        &self,
        phone: &PhoneNumber,
        amount: Amount,
        sale_ref: &SaleRef,
    ) -> Result<PushAccepted> {
        let url = format!("{}/mpesa/stk-push/", self.base_url);
        debug!(%url, "Posting STK push");
        let response = self
            .authorize(self.client.post(&url))
            .json(&StkPushBody::new(phone, amount, sale_ref))
            .send()
            .await
            .map_err(|e| PaymentError::GatewayRejected(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::GatewayRejected(
                Self::failure_text(response).await,
            ));
        }

        let reply: StkPushReply = response
            .json()
            .await
            .map_err(|e| PaymentError::GatewayRejected(e.to_string()))?;
        Ok(reply.into())
    }

    async fn check_status(&self, checkout_reference: &CheckoutReference) -> Result<StatusReport> {
        let url = format!("{}/mpesa/status/{}/", self.base_url, checkout_reference);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| PaymentError::TransientPollError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::TransientPollError(
                Self::failure_text(response).await,
            ));
        }

        let reply: StatusReply = response
            .json()
            .await
            .map_err(|e| PaymentError::TransientPollError(e.to_string()))?;
        Ok(reply.into())
    }
}
