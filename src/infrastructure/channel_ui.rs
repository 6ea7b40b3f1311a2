use crate::domain::ports::HostUi;
use crate::domain::session::SessionView;
use crate::error::PaymentError;
use tokio::sync::mpsc;

/// A lifecycle notification, as observed by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Rendered(SessionView),
    Proceed(SessionView),
    Error(String),
}

/// A `HostUi` that forwards every notification into a channel.
///
/// Lets a host consume the controller's notifications from its own task.
/// Sends never block; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelUi {
    events: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelUi {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl HostUi for ChannelUi {
    fn render(&self, view: &SessionView) {
        let _ = self.events.send(UiEvent::Rendered(view.clone()));
    }

    fn proceed(&self, view: &SessionView) {
        let _ = self.events.send(UiEvent::Proceed(view.clone()));
    }

    fn notify_error(&self, error: &PaymentError) {
        let _ = self.events.send(UiEvent::Error(error.to_string()));
    }
}
