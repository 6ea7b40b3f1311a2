//! The payment session value and its pure transition function.
//!
//! `transition` never touches timers or the network. It returns the next
//! session together with an `Effect` describing what the controller must do
//! with its scoped resources, which keeps the lifecycle testable without a
//! runtime.

use super::payment::{CheckoutReference, GatewayStatus, PushAccepted, StatusReport};
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::fmt;

pub const PENDING_MESSAGE: &str = "Check your phone for the M-Pesa prompt";
pub const CONFIRMED_MESSAGE: &str = "Payment confirmed!";
pub const FAILED_MESSAGE: &str = "Payment failed. Please try again.";
pub const CANCELLED_AT_GATEWAY_MESSAGE: &str = "You cancelled the M-Pesa prompt. Please retry.";
pub const TIMED_OUT_MESSAGE: &str = "Payment is taking longer than expected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl PaymentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// `TimedOut` is retryable separately from `Failed` because the payment
    /// may still land on the gateway side.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalStatus {
    Success { receipt_reference: Option<String> },
    Failed { reason: Option<String> },
    Cancelled,
}

/// Classified result of one status-check tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Terminal(TerminalStatus),
    StillPending,
    /// The check itself failed at the transport level. Counts as pending.
    TransientError(String),
}

impl PollOutcome {
    pub fn classify(result: Result<StatusReport>) -> Self {
        match result {
            Ok(report) => match report.status {
                GatewayStatus::Success => Self::Terminal(TerminalStatus::Success {
                    receipt_reference: report.receipt_reference,
                }),
                GatewayStatus::Failed => Self::Terminal(TerminalStatus::Failed {
                    reason: report.reason_text,
                }),
                GatewayStatus::Cancelled => Self::Terminal(TerminalStatus::Cancelled),
                GatewayStatus::Pending => Self::StillPending,
            },
            Err(e) => Self::TransientError(e.to_string()),
        }
    }
}

/// The live lifecycle of one mobile-money transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentSession {
    state: PaymentState,
    checkout_reference: Option<CheckoutReference>,
    poll_count: u32,
    elapsed_seconds: u32,
    message: String,
    receipt_reference: Option<String>,
}

impl PaymentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn checkout_reference(&self) -> Option<&CheckoutReference> {
        self.checkout_reference.as_ref()
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed_seconds
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn receipt_reference(&self) -> Option<&str> {
        self.receipt_reference.as_deref()
    }

    pub fn view(&self) -> SessionView {
        SessionView::from(self)
    }

    fn finish(&self, state: PaymentState, message: String) -> Self {
        Self {
            state,
            message,
            ..self.clone()
        }
    }
}

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PushAccepted(PushAccepted),
    PushRejected {
        reason: String,
    },
    /// The poll timer fired.
    PollIssued,
    PollCompleted {
        checkout_reference: CheckoutReference,
        attempt: u32,
        outcome: PollOutcome,
    },
    /// The one-second display timer fired.
    ElapsedTick,
    Cancel,
    Retry,
}

/// What the controller must do after applying a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// The event no longer applies to the active session and was ignored.
    Discarded,
    StartTimers,
    IssueStatusCheck {
        checkout_reference: CheckoutReference,
        attempt: u32,
    },
    StopTimers,
    /// Stop the timers and schedule the delayed proceed notification.
    Settle,
    /// Drop every scoped resource, including a scheduled proceed.
    Release,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub session: PaymentSession,
    pub effect: Effect,
}

impl Step {
    fn to(session: PaymentSession, effect: Effect) -> Self {
        Self { session, effect }
    }

    fn unchanged(session: &PaymentSession, effect: Effect) -> Self {
        Self::to(session.clone(), effect)
    }
}

/// Applies `event` to `session`.
///
/// Operations invoked in a state that does not allow them return
/// `InvalidStateError`; the caller keeps the old session in that case.
/// Late timer and network callbacks are answered with `Effect::Discarded`.
pub fn transition(session: &PaymentSession, event: SessionEvent, max_polls: u32) -> Result<Step> {
    let state = session.state;
    match event {
        SessionEvent::PushAccepted(accepted) => {
            if state != PaymentState::Idle {
                return Err(PaymentError::InvalidStateError {
                    operation: "initiate",
                    state,
                });
            }
            let message = accepted
                .prompt_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| PENDING_MESSAGE.to_string());
            let next = PaymentSession {
                state: PaymentState::Pending,
                checkout_reference: Some(accepted.checkout_reference),
                poll_count: 0,
                elapsed_seconds: 0,
                message,
                receipt_reference: None,
            };
            Ok(Step::to(next, Effect::StartTimers))
        }
        SessionEvent::PushRejected { reason } => {
            if state != PaymentState::Idle {
                return Err(PaymentError::InvalidStateError {
                    operation: "initiate",
                    state,
                });
            }
            let next = PaymentSession {
                message: reason,
                ..PaymentSession::default()
            };
            Ok(Step::to(next, Effect::None))
        }
        SessionEvent::PollIssued => {
            let Some(reference) = session.checkout_reference.clone() else {
                return Ok(Step::unchanged(session, Effect::Discarded));
            };
            if state != PaymentState::Pending || session.poll_count >= max_polls {
                return Ok(Step::unchanged(session, Effect::Discarded));
            }
            let attempt = session.poll_count + 1;
            let next = PaymentSession {
                poll_count: attempt,
                ..session.clone()
            };
            Ok(Step::to(
                next,
                Effect::IssueStatusCheck {
                    checkout_reference: reference,
                    attempt,
                },
            ))
        }
        SessionEvent::PollCompleted {
            checkout_reference,
            attempt,
            outcome,
        } => {
            if state != PaymentState::Pending
                || session.checkout_reference.as_ref() != Some(&checkout_reference)
            {
                return Ok(Step::unchanged(session, Effect::Discarded));
            }
            Ok(match outcome {
                PollOutcome::Terminal(TerminalStatus::Success { receipt_reference }) => {
                    let message = match &receipt_reference {
                        Some(receipt) => format!("Receipt: {receipt}"),
                        None => CONFIRMED_MESSAGE.to_string(),
                    };
                    let next = PaymentSession {
                        receipt_reference,
                        ..session.finish(PaymentState::Succeeded, message)
                    };
                    Step::to(next, Effect::Settle)
                }
                PollOutcome::Terminal(TerminalStatus::Failed { reason }) => {
                    let message = reason
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| FAILED_MESSAGE.to_string());
                    Step::to(
                        session.finish(PaymentState::Failed, message),
                        Effect::StopTimers,
                    )
                }
                PollOutcome::Terminal(TerminalStatus::Cancelled) => Step::to(
                    session.finish(
                        PaymentState::Failed,
                        CANCELLED_AT_GATEWAY_MESSAGE.to_string(),
                    ),
                    Effect::StopTimers,
                ),
                PollOutcome::StillPending | PollOutcome::TransientError(_) => {
                    if attempt >= max_polls {
                        Step::to(
                            session.finish(PaymentState::TimedOut, TIMED_OUT_MESSAGE.to_string()),
                            Effect::StopTimers,
                        )
                    } else {
                        Step::unchanged(session, Effect::None)
                    }
                }
            })
        }
        SessionEvent::ElapsedTick => {
            if state != PaymentState::Pending {
                return Ok(Step::unchanged(session, Effect::Discarded));
            }
            let next = PaymentSession {
                elapsed_seconds: session.elapsed_seconds + 1,
                ..session.clone()
            };
            Ok(Step::to(next, Effect::None))
        }
        SessionEvent::Cancel => {
            if state == PaymentState::Idle {
                return Ok(Step::unchanged(session, Effect::None));
            }
            Ok(Step::to(PaymentSession::default(), Effect::Release))
        }
        SessionEvent::Retry => {
            if !state.is_retryable() {
                return Err(PaymentError::InvalidStateError {
                    operation: "retry",
                    state,
                });
            }
            Ok(Step::to(PaymentSession::default(), Effect::Release))
        }
    }
}

/// Read-only projection of the session handed to the host UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub state: PaymentState,
    pub elapsed_seconds: u32,
    pub poll_count: u32,
    pub message: String,
    pub receipt_reference: Option<String>,
}

impl SessionView {
    /// Fraction of the confirmation ceiling already spent, clamped to 1.0.
    pub fn progress(&self, ceiling_seconds: u32) -> f64 {
        if ceiling_seconds == 0 {
            return 1.0;
        }
        (f64::from(self.elapsed_seconds) / f64::from(ceiling_seconds)).min(1.0)
    }

    /// The user-visible error for a retryable terminal state.
    pub fn outcome_error(&self) -> Option<PaymentError> {
        match self.state {
            PaymentState::Failed => Some(PaymentError::PaymentDeclined(self.message.clone())),
            PaymentState::TimedOut => {
                Some(PaymentError::ConfirmationTimeout(self.message.clone()))
            }
            _ => None,
        }
    }
}

impl From<&PaymentSession> for SessionView {
    fn from(session: &PaymentSession) -> Self {
        Self {
            state: session.state,
            elapsed_seconds: session.elapsed_seconds,
            poll_count: session.poll_count,
            message: session.message.clone(),
            receipt_reference: session.receipt_reference.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const MAX_POLLS: u32 = 24;

    fn reference() -> CheckoutReference {
        CheckoutReference("ABC123".to_string())
    }

    fn apply(session: &PaymentSession, event: SessionEvent) -> Step {
        transition(session, event, MAX_POLLS).unwrap()
    }

    fn pending_session() -> PaymentSession {
        apply(
            &PaymentSession::new(),
            SessionEvent::PushAccepted(PushAccepted {
                checkout_reference: reference(),
                prompt_message: None,
            }),
        )
        .session
    }

    /// Issues one poll and completes it with `outcome`.
    fn poll(session: &PaymentSession, outcome: PollOutcome) -> Step {
        let issued = apply(session, SessionEvent::PollIssued);
        let attempt = match issued.effect {
            Effect::IssueStatusCheck { attempt, .. } => attempt,
            _ => session.poll_count(),
        };
        apply(
            &issued.session,
            SessionEvent::PollCompleted {
                checkout_reference: reference(),
                attempt,
                outcome,
            },
        )
    }

    #[test]
    fn test_accepted_push_enters_pending() {
        let step = apply(
            &PaymentSession::new(),
            SessionEvent::PushAccepted(PushAccepted {
                checkout_reference: reference(),
                prompt_message: Some("Enter your PIN".to_string()),
            }),
        );
        assert_eq!(step.effect, Effect::StartTimers);
        assert_eq!(step.session.state(), PaymentState::Pending);
        assert_eq!(step.session.checkout_reference(), Some(&reference()));
        assert_eq!(step.session.poll_count(), 0);
        assert_eq!(step.session.elapsed_seconds(), 0);
        assert_eq!(step.session.message(), "Enter your PIN");
    }

    #[test]
    fn test_accepted_push_without_prompt_uses_default_message() {
        assert_eq!(pending_session().message(), PENDING_MESSAGE);
    }

    #[test]
    fn test_rejected_push_stays_idle() {
        let step = apply(
            &PaymentSession::new(),
            SessionEvent::PushRejected {
                reason: "Invalid number".to_string(),
            },
        );
        assert_eq!(step.effect, Effect::None);
        assert_eq!(step.session.state(), PaymentState::Idle);
        assert_eq!(step.session.message(), "Invalid number");
        assert!(step.session.checkout_reference().is_none());
    }

    #[test]
    fn test_initiate_while_pending_is_invalid() {
        let result = transition(
            &pending_session(),
            SessionEvent::PushAccepted(PushAccepted {
                checkout_reference: CheckoutReference("OTHER".to_string()),
                prompt_message: None,
            }),
            MAX_POLLS,
        );
        assert!(matches!(
            result,
            Err(PaymentError::InvalidStateError {
                operation: "initiate",
                state: PaymentState::Pending
            })
        ));
    }

    #[test]
    fn test_poll_issue_increments_count() {
        let step = apply(&pending_session(), SessionEvent::PollIssued);
        assert_eq!(step.session.poll_count(), 1);
        assert_eq!(
            step.effect,
            Effect::IssueStatusCheck {
                checkout_reference: reference(),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_success_records_receipt_and_settles() {
        let step = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Success {
                receipt_reference: Some("RCPT-9".to_string()),
            }),
        );
        assert_eq!(step.effect, Effect::Settle);
        assert_eq!(step.session.state(), PaymentState::Succeeded);
        assert_eq!(step.session.receipt_reference(), Some("RCPT-9"));
        assert_eq!(step.session.message(), "Receipt: RCPT-9");
    }

    #[test]
    fn test_success_without_receipt() {
        let step = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Success {
                receipt_reference: None,
            }),
        );
        assert_eq!(step.session.message(), CONFIRMED_MESSAGE);
        assert!(step.session.receipt_reference().is_none());
    }

    #[test]
    fn test_failed_uses_reason_or_fallback() {
        let with_reason = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Failed {
                reason: Some("Insufficient balance".to_string()),
            }),
        );
        assert_eq!(with_reason.effect, Effect::StopTimers);
        assert_eq!(with_reason.session.state(), PaymentState::Failed);
        assert_eq!(with_reason.session.message(), "Insufficient balance");

        let without_reason = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Failed { reason: None }),
        );
        assert_eq!(without_reason.session.message(), FAILED_MESSAGE);
    }

    #[test]
    fn test_gateway_cancel_is_a_failure_with_its_own_text() {
        let step = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Cancelled),
        );
        assert_eq!(step.session.state(), PaymentState::Failed);
        assert_eq!(step.session.message(), CANCELLED_AT_GATEWAY_MESSAGE);
    }

    #[test]
    fn test_timeout_boundary() {
        let mut session = pending_session();
        for _ in 0..MAX_POLLS - 1 {
            let step = poll(&session, PollOutcome::StillPending);
            assert_eq!(step.session.state(), PaymentState::Pending);
            session = step.session;
        }
        assert_eq!(session.poll_count(), MAX_POLLS - 1);

        let success = poll(
            &session,
            PollOutcome::Terminal(TerminalStatus::Success {
                receipt_reference: None,
            }),
        );
        assert_eq!(success.session.state(), PaymentState::Succeeded);

        let timed_out = poll(&session, PollOutcome::StillPending);
        assert_eq!(timed_out.session.state(), PaymentState::TimedOut);
        assert_eq!(timed_out.effect, Effect::StopTimers);
        assert!(timed_out.session.message().contains("taking longer than expected"));
    }

    #[test]
    fn test_transient_error_counts_toward_timeout() {
        let mut session = pending_session();
        let step = poll(&session, PollOutcome::TransientError("reset".to_string()));
        assert_eq!(step.effect, Effect::None);
        assert_eq!(step.session.state(), PaymentState::Pending);
        assert_eq!(step.session.poll_count(), 1);
        session = step.session;

        for _ in 1..MAX_POLLS {
            session = poll(&session, PollOutcome::StillPending).session;
        }
        assert_eq!(session.state(), PaymentState::TimedOut);
        assert_eq!(session.poll_count(), MAX_POLLS);
    }

    #[test]
    fn test_no_polls_issued_past_ceiling() {
        let mut session = pending_session();
        for _ in 0..MAX_POLLS {
            session = apply(&session, SessionEvent::PollIssued).session;
        }
        let step = apply(&session, SessionEvent::PollIssued);
        assert_eq!(step.effect, Effect::Discarded);
        assert_eq!(step.session.poll_count(), MAX_POLLS);
    }

    #[test]
    fn test_response_for_other_checkout_is_discarded() {
        let session = apply(&pending_session(), SessionEvent::PollIssued).session;
        let step = apply(
            &session,
            SessionEvent::PollCompleted {
                checkout_reference: CheckoutReference("OLD".to_string()),
                attempt: 1,
                outcome: PollOutcome::Terminal(TerminalStatus::Success {
                    receipt_reference: None,
                }),
            },
        );
        assert_eq!(step.effect, Effect::Discarded);
        assert_eq!(step.session, session);
    }

    #[test]
    fn test_late_response_after_cancel_is_discarded() {
        let issued = apply(&pending_session(), SessionEvent::PollIssued).session;
        let cancelled = apply(&issued, SessionEvent::Cancel);
        assert_eq!(cancelled.effect, Effect::Release);
        assert_eq!(cancelled.session.state(), PaymentState::Idle);

        let late = apply(
            &cancelled.session,
            SessionEvent::PollCompleted {
                checkout_reference: reference(),
                attempt: 1,
                outcome: PollOutcome::Terminal(TerminalStatus::Success {
                    receipt_reference: Some("RCPT".to_string()),
                }),
            },
        );
        assert_eq!(late.effect, Effect::Discarded);
        assert_eq!(late.session.state(), PaymentState::Idle);
    }

    #[test]
    fn test_elapsed_tick_only_counts_while_pending() {
        let step = apply(&pending_session(), SessionEvent::ElapsedTick);
        assert_eq!(step.session.elapsed_seconds(), 1);

        let idle = apply(&PaymentSession::new(), SessionEvent::ElapsedTick);
        assert_eq!(idle.effect, Effect::Discarded);
        assert_eq!(idle.session.elapsed_seconds(), 0);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let once = apply(&pending_session(), SessionEvent::Cancel);
        let twice = apply(&once.session, SessionEvent::Cancel);
        assert_eq!(once.session, twice.session);
        assert_eq!(twice.session.state(), PaymentState::Idle);
        assert_eq!(twice.effect, Effect::None);
    }

    #[test]
    fn test_retry_clears_session() {
        let mut session = pending_session();
        session = apply(&session, SessionEvent::ElapsedTick).session;
        session = poll(&session, PollOutcome::Terminal(TerminalStatus::Cancelled)).session;

        let step = apply(&session, SessionEvent::Retry);
        assert_eq!(step.session, PaymentSession::default());
        assert_eq!(step.session.message(), "");
        assert_eq!(step.session.elapsed_seconds(), 0);
        assert_eq!(step.session.poll_count(), 0);
    }

    #[test]
    fn test_retry_outside_retryable_states_is_invalid() {
        for session in [PaymentSession::new(), pending_session()] {
            let result = transition(&session, SessionEvent::Retry, MAX_POLLS);
            assert!(matches!(
                result,
                Err(PaymentError::InvalidStateError {
                    operation: "retry",
                    ..
                })
            ));
        }

        let succeeded = poll(
            &pending_session(),
            PollOutcome::Terminal(TerminalStatus::Success {
                receipt_reference: None,
            }),
        )
        .session;
        assert!(transition(&succeeded, SessionEvent::Retry, MAX_POLLS).is_err());
    }

    #[test]
    fn test_classify_status_reports() {
        let outcome = PollOutcome::classify(Ok(StatusReport {
            status: GatewayStatus::Success,
            receipt_reference: Some("R1".to_string()),
            reason_text: None,
        }));
        assert_eq!(
            outcome,
            PollOutcome::Terminal(TerminalStatus::Success {
                receipt_reference: Some("R1".to_string())
            })
        );

        assert_eq!(
            PollOutcome::classify(Ok(StatusReport::pending())),
            PollOutcome::StillPending
        );

        let transient = PollOutcome::classify(Err(PaymentError::TransientPollError(
            "connection reset".to_string(),
        )));
        assert!(matches!(transient, PollOutcome::TransientError(_)));
    }

    #[test]
    fn test_view_progress_and_outcome_error() {
        let mut session = pending_session();
        for _ in 0..60 {
            session = apply(&session, SessionEvent::ElapsedTick).session;
        }
        let view = session.view();
        assert!((view.progress(120) - 0.5).abs() < f64::EPSILON);
        assert!(view.outcome_error().is_none());

        for _ in 0..100 {
            session = apply(&session, SessionEvent::ElapsedTick).session;
        }
        assert_eq!(session.view().progress(120), 1.0);

        let failed = poll(&session, PollOutcome::Terminal(TerminalStatus::Cancelled)).session;
        assert!(matches!(
            failed.view().outcome_error(),
            Some(PaymentError::PaymentDeclined(_))
        ));
    }

    #[test]
    fn test_random_poll_sequences_reach_exactly_one_terminal_state() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let mut session = pending_session();
            let mut terminal_entries = 0;
            let mut terminal_state = None;

            for _ in 0..rng.gen_range(1..40) {
                let outcome = match rng.gen_range(0..10) {
                    0 => PollOutcome::Terminal(TerminalStatus::Success {
                        receipt_reference: None,
                    }),
                    1 => PollOutcome::Terminal(TerminalStatus::Failed { reason: None }),
                    2 => PollOutcome::Terminal(TerminalStatus::Cancelled),
                    3 | 4 => PollOutcome::TransientError("flaky".to_string()),
                    _ => PollOutcome::StillPending,
                };
                let before = session.state();
                let step = poll(&session, outcome);
                let after = step.session.state();

                if before.is_terminal() {
                    assert_eq!(before, after, "terminal state must be sticky");
                    assert_eq!(step.effect, Effect::Discarded);
                } else if after.is_terminal() {
                    terminal_entries += 1;
                    terminal_state = Some(after);
                }
                assert!(step.session.poll_count() <= MAX_POLLS);
                session = step.session;
            }

            assert!(terminal_entries <= 1);
            if session.poll_count() == MAX_POLLS {
                assert_eq!(terminal_entries, 1);
            }
            if let Some(state) = terminal_state {
                assert_eq!(session.state(), state);
            }
        }
    }
}
