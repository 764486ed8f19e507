//! Server-imposed chat mute tracking.
//!
//! A "muted" notice starts a once-per-second countdown. A fresh notice
//! restarts it at the new duration; the generation stored with the state is
//! bumped so the superseded countdown task exits without touching anything.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Observable mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MuteState {
    pub active: bool,
    pub remaining_seconds: u32,
}

#[derive(Debug, Default)]
struct Countdown {
    state: MuteState,
    generation: u64,
}

#[derive(Debug)]
pub struct MuteMonitor {
    countdown: Mutex<Countdown>,
    tick: Duration,
}

impl Default for MuteMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MuteMonitor {
    pub fn new() -> Self {
        Self::with_tick(Duration::from_secs(1))
    }

    /// Monitor with a custom tick length.
    pub fn with_tick(tick: Duration) -> Self {
        Self {
            countdown: Mutex::new(Countdown::default()),
            tick,
        }
    }

    pub async fn state(&self) -> MuteState {
        self.countdown.lock().await.state
    }

    pub async fn is_muted(&self) -> bool {
        self.state().await.active
    }

    /// Handle a "muted" notice. Any running countdown is superseded.
    pub async fn on_muted(self: &Arc<Self>, seconds: i32) {
        let seconds = u32::try_from(seconds).unwrap_or(0);
        let generation = {
            let mut countdown = self.countdown.lock().await;
            countdown.generation += 1;
            countdown.state = MuteState {
                active: seconds > 0,
                remaining_seconds: seconds,
            };
            countdown.generation
        };

        info!(seconds, "muted");
        if seconds > 0 {
            tokio::spawn(Arc::clone(self).count_down(generation));
        }
    }

    /// Handle a "still muted" notice. Informational only.
    pub fn on_still_muted(&self, remaining: i32) {
        info!(remaining, "mute still active");
    }

    async fn count_down(self: Arc<Self>, generation: u64) {
        loop {
            tokio::time::sleep(self.tick).await;

            let mut countdown = self.countdown.lock().await;
            if countdown.generation != generation {
                debug!(generation, "mute countdown superseded");
                return;
            }

            countdown.state.remaining_seconds = countdown.state.remaining_seconds.saturating_sub(1);
            if countdown.state.remaining_seconds == 0 {
                countdown.state.active = false;
                info!("mute ended");
                return;
            }
            debug!(remaining = countdown.state.remaining_seconds, "mute countdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_reaches_idle_after_exact_ticks() {
        let monitor = Arc::new(MuteMonitor::new());
        monitor.on_muted(3).await;
        assert_eq!(
            monitor.state().await,
            MuteState {
                active: true,
                remaining_seconds: 3
            }
        );

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(monitor.state().await.remaining_seconds, 2);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.state().await.remaining_seconds, 1);
        assert!(monitor.is_muted().await);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.state().await, MuteState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_notice_restarts_countdown() {
        let monitor = Arc::new(MuteMonitor::new());
        monitor.on_muted(5).await;
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(monitor.state().await.remaining_seconds, 3);

        monitor.on_muted(4).await;
        assert_eq!(monitor.state().await.remaining_seconds, 4);

        // Old task would have fired at 3s, 4s and 5s; only the new one counts.
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(
            monitor.state().await,
            MuteState {
                active: true,
                remaining_seconds: 1
            }
        );

        sleep(Duration::from_secs(1)).await;
        assert!(!monitor.is_muted().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_notice_is_not_summed() {
        let monitor = Arc::new(MuteMonitor::new());
        monitor.on_muted(60).await;
        monitor.on_muted(1).await;

        sleep(Duration::from_millis(1500)).await;
        assert!(!monitor.is_muted().await);

        sleep(Duration::from_secs(120)).await;
        assert_eq!(monitor.state().await, MuteState::default());
    }

    #[tokio::test]
    async fn test_non_positive_notice_clears() {
        let monitor = Arc::new(MuteMonitor::new());
        monitor.on_muted(0).await;
        assert!(!monitor.is_muted().await);
        monitor.on_muted(-4).await;
        assert_eq!(monitor.state().await, MuteState::default());
    }

    #[tokio::test]
    async fn test_still_muted_changes_nothing() {
        let monitor = MuteMonitor::new();
        monitor.on_still_muted(12);
        assert_eq!(monitor.state().await, MuteState::default());
    }
}
