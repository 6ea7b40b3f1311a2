use crate::domain::payment::{
    Amount, CheckoutReference, PhoneNumber, PushAccepted, SaleRef, StatusReport,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One scripted gateway answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedStep {
    Accept {
        checkout_reference: String,
        prompt_message: Option<String>,
    },
    Reject(String),
    Status(StatusReport),
    TransientError(String),
}

#[derive(Debug, Default)]
struct Script {
    pushes: VecDeque<ScriptedStep>,
    statuses: VecDeque<ScriptedStep>,
    checked: Vec<CheckoutReference>,
}

/// An in-memory gateway that replays scripted answers.
///
/// Push answers and status answers are queued separately, in the order given.
/// Once the status queue is empty every check reports `pending`. Cloning shares
/// the script, so a test can keep a clone to inspect calls.
#[derive(Debug, Default, Clone)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
    push_calls: Arc<AtomicUsize>,
    status_calls: Arc<AtomicUsize>,
    latency: Duration,
}

impl ScriptedGateway {
    /// Creates a new gateway with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        let gateway = Self::new();
        for step in steps {
            gateway.enqueue(step);
        }
        gateway
    }

    /// Delays every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn enqueue(&self, step: ScriptedStep) {
        let mut script = self.lock();
        match step {
            ScriptedStep::Accept { .. } | ScriptedStep::Reject(_) => script.pushes.push_back(step),
            ScriptedStep::Status(_) | ScriptedStep::TransientError(_) => {
                script.statuses.push_back(step)
            }
        }
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// References passed to `check_status`, oldest first.
    pub fn checked_references(&self) -> Vec<CheckoutReference> {
        self.lock().checked.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn push(
        &self,
        _phone: &PhoneNumber,
        _amount: Amount,
        _sale_ref: &SaleRef,
    ) -> Result<PushAccepted> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.lock().pushes.pop_front();
        self.wait().await;
        match step {
            Some(ScriptedStep::Accept {
                checkout_reference,
                prompt_message,
            }) => Ok(PushAccepted {
                checkout_reference: CheckoutReference(checkout_reference),
                prompt_message,
            }),
            Some(ScriptedStep::Reject(reason)) => Err(PaymentError::GatewayRejected(reason)),
            _ => Err(PaymentError::GatewayRejected(
                "No scripted push response".to_string(),
            )),
        }
    }

    async fn check_status(&self, checkout_reference: &CheckoutReference) -> Result<StatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut script = self.lock();
            script.checked.push(checkout_reference.clone());
            script.statuses.pop_front()
        };
        self.wait().await;
        match step {
            Some(ScriptedStep::Status(report)) => Ok(report),
            Some(ScriptedStep::TransientError(reason)) => {
                Err(PaymentError::TransientPollError(reason))
            }
            _ => Ok(StatusReport::pending()),
        }
    }
}
