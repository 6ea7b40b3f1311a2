use crate::error::{PaymentError, Result};
use std::time::Duration;

/// Gap between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Status checks issued before giving up (24 x 5s = 120s).
pub const DEFAULT_MAX_POLLS: u32 = 24;
/// Cadence of the user-facing elapsed counter.
pub const DEFAULT_ELAPSED_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between reaching `Succeeded` and the proceed notification.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1800);

/// Timing constants for the confirmation flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub elapsed_interval: Duration,
    pub settle_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            elapsed_interval: DEFAULT_ELAPSED_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() || self.elapsed_interval.is_zero() {
            return Err(PaymentError::ValidationError(
                "Timer intervals must be non-zero".to_string(),
            ));
        }
        if self.max_polls == 0 {
            return Err(PaymentError::ValidationError(
                "At least one status check is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Nominal confirmation window, `poll_interval * max_polls`.
    ///
    /// Each check gets one further poll interval to answer, so a session
    /// leaves `Pending` no later than `ceiling() + poll_interval`.
    pub fn ceiling(&self) -> Duration {
        self.poll_interval * self.max_polls
    }
}
