use super::timers::{self, ScopedTask};
use crate::config::ControllerConfig;
use crate::domain::payment::{CheckoutReference, PaymentRequest, PushAccepted, StatusReport};
use crate::domain::ports::{GatewayBox, HostUiBox};
use crate::domain::session::{
    Effect, PaymentSession, PaymentState, PollOutcome, SessionEvent, SessionView, transition,
};
use crate::error::{PaymentError, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 16;

/// Intents sent by the host through a `ControllerHandle`.
enum Command {
    Initiate {
        request: PaymentRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Retry {
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionView>,
    },
    Teardown {
        reply: oneshot::Sender<()>,
    },
}

/// Timer and network callbacks, each tagged with the session it belongs to.
#[derive(Debug)]
enum Signal {
    PushFinished {
        attempt: u64,
        result: Result<PushAccepted>,
    },
    PollTick {
        generation: u64,
    },
    ElapsedTick {
        generation: u64,
    },
    PollFinished {
        generation: u64,
        checkout_reference: CheckoutReference,
        attempt: u32,
        result: Result<StatusReport>,
    },
    Proceed {
        generation: u64,
    },
}

/// Resources owned while the session is `Pending`. Dropping this stops both
/// timers and abandons any status check still in flight.
struct SessionTimers {
    _poll: ScopedTask,
    _elapsed: ScopedTask,
    checks: JoinSet<()>,
}

impl SessionTimers {
    fn start(
        config: &ControllerConfig,
        signals: &mpsc::UnboundedSender<Signal>,
        generation: u64,
    ) -> Self {
        Self {
            _poll: timers::ticker(config.poll_interval, signals.clone(), move || {
                Signal::PollTick { generation }
            }),
            _elapsed: timers::ticker(config.elapsed_interval, signals.clone(), move || {
                Signal::ElapsedTick { generation }
            }),
            checks: JoinSet::new(),
        }
    }
}

struct InflightPush {
    attempt: u64,
    reply: oneshot::Sender<Result<()>>,
    _task: ScopedTask,
}

/// Owns the `PaymentSession` of one checkout and drives it through its
/// lifecycle.
///
/// The controller runs as a single task. Host intents arrive on a command
/// channel; timer ticks and gateway responses arrive on a signal channel. All
/// transitions happen on that one task, so no locking is needed, and every
/// callback is checked against the active session before it is applied.
pub struct PaymentController {
    session: PaymentSession,
    config: ControllerConfig,
    gateway: GatewayBox,
    ui: HostUiBox,
    commands: mpsc::Receiver<Command>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    generation: u64,
    push_attempts: u64,
    inflight_push: Option<InflightPush>,
    timers: Option<SessionTimers>,
    proceed: Option<ScopedTask>,
}

impl PaymentController {
    /// Spawns a controller task and returns the handle used to drive it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        gateway: GatewayBox,
        ui: HostUiBox,
        config: ControllerConfig,
    ) -> Result<ControllerHandle> {
        config.validate()?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (signals_tx, signals) = mpsc::unbounded_channel();

        let controller = Self {
            session: PaymentSession::new(),
            config,
            gateway,
            ui,
            commands,
            signals_tx,
            signals,
            generation: 0,
            push_attempts: 0,
            inflight_push: None,
            timers: None,
            proceed: None,
        };
        tokio::spawn(controller.run());

        Ok(ControllerHandle {
            commands: commands_tx,
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Teardown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
            }
        }
        debug!("Payment controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Initiate { request, reply } => self.initiate(request, reply),
            Command::Cancel { reply } => {
                self.cancel();
                let _ = reply.send(());
            }
            Command::Retry { reply } => {
                let result = self.apply(SessionEvent::Retry);
                if let Err(e) = &result {
                    warn!("Rejected retry: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.view());
            }
            // Handled by the run loop.
            Command::Teardown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Starts the push request. The reply is answered once the gateway has
    /// accepted or rejected it.
    fn initiate(&mut self, request: PaymentRequest, reply: oneshot::Sender<Result<()>>) {
        let state = self.session.state();
        let operation = if self.inflight_push.is_some() {
            Some("initiate again")
        } else if state != PaymentState::Idle {
            Some("initiate")
        } else {
            None
        };
        if let Some(operation) = operation {
            let e = PaymentError::InvalidStateError { operation, state };
            warn!("Rejected initiate: {}", e);
            let _ = reply.send(Err(e));
            return;
        }

        self.push_attempts += 1;
        let attempt = self.push_attempts;
        info!(
            sale = %request.sale_ref(),
            amount = %request.amount(),
            "Sending STK push"
        );

        let gateway = self.gateway.clone();
        let signals = self.signals_tx.clone();
        let task = ScopedTask::spawn(async move {
            let result = gateway
                .push(request.phone(), request.amount(), request.sale_ref())
                .await;
            let _ = signals.send(Signal::PushFinished { attempt, result });
        });
        self.inflight_push = Some(InflightPush {
            attempt,
            reply,
            _task: task,
        });
    }

    fn cancel(&mut self) {
        if let Some(inflight) = self.inflight_push.take() {
            info!("Abandoning STK push still in flight");
            let _ = inflight.reply.send(Err(PaymentError::Cancelled));
        }
        if let Err(e) = self.apply(SessionEvent::Cancel) {
            warn!("Cancel failed: {}", e);
        }
    }

    fn teardown(&mut self) {
        if let Some(inflight) = self.inflight_push.take() {
            let _ = inflight.reply.send(Err(PaymentError::Cancelled));
        }
        self.release();
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::PushFinished { attempt, result } => self.on_push_finished(attempt, result),
            Signal::PollTick { generation } => {
                if self.is_current(generation) {
                    self.apply_signal(SessionEvent::PollIssued);
                }
            }
            Signal::ElapsedTick { generation } => {
                if self.is_current(generation) {
                    self.apply_signal(SessionEvent::ElapsedTick);
                }
            }
            Signal::PollFinished {
                generation,
                checkout_reference,
                attempt,
                result,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                let outcome = PollOutcome::classify(result);
                if let PollOutcome::TransientError(reason) = &outcome {
                    warn!(
                        checkout = %checkout_reference,
                        attempt,
                        "Status check failed, will keep polling: {}",
                        reason
                    );
                }
                self.apply_signal(SessionEvent::PollCompleted {
                    checkout_reference,
                    attempt,
                    outcome,
                });
            }
            Signal::Proceed { generation } => {
                if !self.is_current(generation) || self.session.state() != PaymentState::Succeeded
                {
                    debug!("Discarded stale proceed notification");
                    return;
                }
                self.proceed = None;
                info!("Proceeding after confirmed payment");
                self.ui.proceed(&self.session.view());
            }
        }
    }

    fn on_push_finished(&mut self, attempt: u64, result: Result<PushAccepted>) {
        let Some(inflight) = self
            .inflight_push
            .take_if(|inflight| inflight.attempt == attempt)
        else {
            debug!(attempt, "Discarded response for an abandoned STK push");
            return;
        };

        match result {
            Ok(accepted) => {
                info!(checkout = %accepted.checkout_reference, "STK push accepted");
                let outcome = self.apply(SessionEvent::PushAccepted(accepted));
                let _ = inflight.reply.send(outcome);
            }
            Err(e) => {
                let reason = match e {
                    PaymentError::GatewayRejected(reason) => reason,
                    other => other.to_string(),
                };
                warn!("STK push rejected: {}", reason);
                self.apply_signal(SessionEvent::PushRejected {
                    reason: reason.clone(),
                });
                let error = PaymentError::GatewayRejected(reason);
                self.report(&error);
                let _ = inflight.reply.send(Err(error));
            }
        }
    }

    fn report(&self, error: &PaymentError) {
        if error.is_user_visible() {
            self.ui.notify_error(error);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(generation, "Discarded callback from a previous session");
            return false;
        }
        true
    }

    fn apply_signal(&mut self, event: SessionEvent) {
        if let Err(e) = self.apply(event) {
            warn!("Ignored callback: {}", e);
        }
    }

    /// Runs one transition, performs its effect, and renders if anything
    /// changed. On error the session is left untouched.
    fn apply(&mut self, event: SessionEvent) -> Result<()> {
        let step = transition(&self.session, event, self.config.max_polls)?;
        let previous = self.session.state();
        let changed = step.session != self.session;
        self.session = step.session;
        self.perform(step.effect);

        if previous != self.session.state() {
            info!(
                from = %previous,
                to = %self.session.state(),
                polls = self.session.poll_count(),
                "Payment state changed"
            );
        }
        if changed {
            self.ui.render(&self.session.view());
        }
        if previous != self.session.state()
            && let Some(error) = self.session.view().outcome_error()
        {
            self.report(&error);
        }
        Ok(())
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Discarded => debug!("Discarded event for an inactive session"),
            Effect::StartTimers => {
                self.release();
                self.timers = Some(SessionTimers::start(
                    &self.config,
                    &self.signals_tx,
                    self.generation,
                ));
            }
            Effect::IssueStatusCheck {
                checkout_reference,
                attempt,
            } => {
                let Some(timers) = self.timers.as_mut() else {
                    return;
                };
                debug!(checkout = %checkout_reference, attempt, "Checking payment status");
                let gateway = self.gateway.clone();
                let signals = self.signals_tx.clone();
                let generation = self.generation;
                // A check gets one poll interval to answer, so the last one
                // cannot hold the session past the ceiling.
                let limit = self.config.poll_interval;
                timers.checks.spawn(async move {
                    let result = time::timeout(limit, gateway.check_status(&checkout_reference))
                        .await
                        .unwrap_or_else(|_| {
                            Err(PaymentError::TransientPollError(format!(
                                "No answer within {}ms",
                                limit.as_millis()
                            )))
                        });
                    let _ = signals.send(Signal::PollFinished {
                        generation,
                        checkout_reference,
                        attempt,
                        result,
                    });
                });
            }
            Effect::StopTimers => {
                self.timers = None;
            }
            Effect::Settle => {
                self.timers = None;
                self.proceed = Some(timers::delay(
                    self.config.settle_delay,
                    self.signals_tx.clone(),
                    Signal::Proceed {
                        generation: self.generation,
                    },
                ));
            }
            Effect::Release => self.release(),
        }
    }

    /// Stops every timer, abandons in-flight checks, cancels a scheduled
    /// proceed, and invalidates callbacks already queued for this session.
    fn release(&mut self) {
        self.timers = None;
        self.proceed = None;
        self.generation += 1;
    }
}

/// Cloneable command surface of a running `PaymentController`.
///
/// When the last handle is dropped the controller tears itself down.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Sends the push request and waits for the gateway's answer.
    ///
    /// Resolves to `Ok(())` once the session is `Pending`, or to
    /// `GatewayRejected` with the session left `Idle`.
    pub async fn initiate(&self, request: PaymentRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Initiate { request, reply }).await?;
        rx.await.map_err(|_| PaymentError::ControllerClosed)?
    }

    /// Discards the session and stops its timers. Idempotent.
    pub async fn cancel(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| PaymentError::ControllerClosed)
    }

    /// Returns a `Failed` or `TimedOut` session to `Idle`.
    pub async fn retry(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retry { reply }).await?;
        rx.await.map_err(|_| PaymentError::ControllerClosed)?
    }

    pub async fn snapshot(&self) -> Result<SessionView> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| PaymentError::ControllerClosed)
    }

    /// Stops every timer and scheduled callback, then shuts the controller
    /// down. Later calls on any handle return `ControllerClosed`.
    pub async fn teardown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Teardown { reply }).await?;
        rx.await.map_err(|_| PaymentError::ControllerClosed)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PaymentError::ControllerClosed)
    }
}
