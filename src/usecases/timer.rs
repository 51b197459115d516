use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

/// Owns a local background task; dropping the guard aborts it.
#[derive(Debug)]
pub struct TimerGuard {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TimerGuard {
    /// Spawns `task` on the current `LocalSet`.
    pub fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        tracing::debug!(timer = name, "timer armed");
        Self {
            name,
            handle: tokio::task::spawn_local(task),
        }
    }

    /// Runs `tick` every `period`, first after one full period.
    pub fn periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self::spawn(name, async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.handle.abort();
        tracing::debug!(timer = self.name, "timer torn down");
    }
}
