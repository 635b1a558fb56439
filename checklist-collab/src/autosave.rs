//! Periodic flush of unsaved text edits.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Delivers one tick per interval until cancelled. The first tick arrives
/// one full interval after `start`. Ticks that are not consumed coalesce.
pub struct AutosaveScheduler {
    interval: Duration,
    ticks: mpsc::Receiver<()>,
    task: JoinHandle<()>,
}

impl AutosaveScheduler {
    pub fn start(interval: Duration) -> Self {
        let (tx, ticks) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                match tx.try_send(()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                    Err(mpsc::error::TrySendError::Closed(())) => break,
                }
            }
        });
        Self { interval, ticks, task }
    }

    /// Wait for the next tick. `None` once cancelled.
    pub async fn tick(&mut self) -> Option<()> {
        self.ticks.recv().await
    }

    pub fn cancel(&mut self) {
        self.task.abort();
        self.ticks.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_finished()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
