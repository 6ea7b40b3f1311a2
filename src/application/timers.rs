use std::future::Future;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

/// A spawned task that is aborted when the handle is dropped.
///
/// Holding one of these is what keeps a timer alive; leaving the owning state
/// drops the handle and the timer with it.
#[derive(Debug)]
pub struct ScopedTask(JoinHandle<()>);

impl ScopedTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sends `make()` into `tx` every `period`, starting one period from now.
pub fn ticker<T, F>(period: Duration, tx: UnboundedSender<T>, mut make: F) -> ScopedTask
where
    T: Send + 'static,
    F: FnMut() -> T + Send + 'static,
{
    ScopedTask::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if tx.send(make()).is_err() {
                break;
            }
        }
    })
}

/// Sends `event` into `tx` once, after `after` has elapsed.
pub fn delay<T>(after: Duration, tx: UnboundedSender<T>, event: T) -> ScopedTask
where
    T: Send + 'static,
{
    ScopedTask::spawn(async move {
        time::sleep(after).await;
        let _ = tx.send(event);
    })
}
