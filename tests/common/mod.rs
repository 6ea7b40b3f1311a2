#![allow(dead_code)]

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use stk_confirm::application::controller::{ControllerHandle, PaymentController};
use stk_confirm::config::ControllerConfig;
use stk_confirm::domain::payment::{GatewayStatus, PaymentRequest, StatusReport};
use stk_confirm::domain::session::{PaymentState, SessionView};
use stk_confirm::infrastructure::channel_ui::{ChannelUi, UiEvent};
use stk_confirm::infrastructure::scripted::{ScriptedGateway, ScriptedStep};
use tokio::sync::mpsc::UnboundedReceiver;

/// Longest virtual time a test waits for an event before failing.
const EVENT_DEADLINE: Duration = Duration::from_secs(600);

pub fn request() -> PaymentRequest {
    PaymentRequest::new("0712345678", dec!(500.00), "S1").unwrap()
}

pub fn accept(reference: &str) -> ScriptedStep {
    ScriptedStep::Accept {
        checkout_reference: reference.to_string(),
        prompt_message: None,
    }
}

pub fn pending() -> ScriptedStep {
    ScriptedStep::Status(StatusReport::pending())
}

pub fn success(receipt: &str) -> ScriptedStep {
    ScriptedStep::Status(StatusReport {
        status: GatewayStatus::Success,
        receipt_reference: Some(receipt.to_string()),
        reason_text: None,
    })
}

pub fn failed(reason: &str) -> ScriptedStep {
    ScriptedStep::Status(StatusReport {
        status: GatewayStatus::Failed,
        receipt_reference: None,
        reason_text: Some(reason.to_string()),
    })
}

pub fn spawn(gateway: ScriptedGateway) -> (ControllerHandle, UnboundedReceiver<UiEvent>) {
    let (ui, events) = ChannelUi::new();
    let handle =
        PaymentController::spawn(Arc::new(gateway), Arc::new(ui), ControllerConfig::default())
            .unwrap();
    (handle, events)
}

/// Waits for the next event satisfying `pred`, skipping everything else.
pub async fn wait_for<F>(events: &mut UnboundedReceiver<UiEvent>, mut pred: F) -> UiEvent
where
    F: FnMut(&UiEvent) -> bool,
{
    tokio::time::timeout(EVENT_DEADLINE, async {
        loop {
            let event = events.recv().await.expect("controller stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Waits until a view in `state` is rendered.
pub async fn wait_for_state(
    events: &mut UnboundedReceiver<UiEvent>,
    state: PaymentState,
) -> SessionView {
    match wait_for(events, |e| matches!(e, UiEvent::Rendered(v) if v.state == state)).await {
        UiEvent::Rendered(view) => view,
        _ => unreachable!(),
    }
}

/// Waits until a view with `poll_count` checks issued is rendered.
pub async fn wait_for_polls(
    events: &mut UnboundedReceiver<UiEvent>,
    poll_count: u32,
) -> SessionView {
    match wait_for(events, |e| matches!(e, UiEvent::Rendered(v) if v.poll_count == poll_count))
        .await
    {
        UiEvent::Rendered(view) => view,
        _ => unreachable!(),
    }
}

/// Returns every event already queued.
pub fn drain(events: &mut UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
