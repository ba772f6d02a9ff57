use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ThrottleConfig;

#[async_trait]
pub trait Sleeper: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-batch pacing of moderation loops.
///
/// Sleeps for `sleep_amount` after every `actions_per_tick` recorded actions.
pub struct Throttle {
    sleeper: Arc<dyn Sleeper>,
    actions_per_tick: u32,
    sleep_amount: Duration,
    applied: u32,
}

impl Throttle {
    pub fn new(config: &ThrottleConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let actions_per_tick = if config.use_sleep {
            config.actions_per_tick
        } else {
            0
        };
        Self {
            sleeper,
            actions_per_tick,
            sleep_amount: config.sleep_amount,
            applied: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.actions_per_tick > 0
    }

    pub async fn record(&mut self) {
        if !self.is_enabled() {
            return;
        }

        self.applied += 1;
        if self.applied >= self.actions_per_tick {
            self.applied = 0;
            tracing::trace!(sleep_amount = ?self.sleep_amount, "throttling");
            self.sleeper.sleep(self.sleep_amount).await;
        }
    }
}

#[cfg(any(test, feature = "test"))]
pub use self::counting::CountingSleeper;

#[cfg(any(test, feature = "test"))]
mod counting {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts sleeps without waiting.
    #[derive(Default)]
    pub struct CountingSleeper {
        count: AtomicUsize,
    }

    impl CountingSleeper {
        pub fn count(&self) -> usize {
            self.count.load(Ordering::Acquire)
        }
    }

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, _: Duration) {
            self.count.fetch_add(1, Ordering::AcqRel);
            tokio::task::yield_now().await;
        }
    }
}
