//! Periodic removal of expired rate windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::security::FixedWindowLimiter;

pub struct WindowSweeper {
    limiter: Arc<FixedWindowLimiter>,
    interval: Duration,
}

impl WindowSweeper {
    pub fn new(limiter: Arc<FixedWindowLimiter>, interval: Duration) -> Self {
        Self { limiter, interval }
    }

    /// Sweep on a fixed tick, independent of traffic, until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Window sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.limiter.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Window sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
