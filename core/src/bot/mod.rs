use std::sync::Arc;

use arc_swap::ArcSwapOption;
use fleetguard_relay::{RelaySender, ShardId};
use fleetguard_storage::Storage;

pub use self::propagation::PropagationSummary;
use crate::config::FleetConfig;
use crate::executor::ActionExecutor;
use crate::platform::Platform;
use crate::tasks::TaskTracker;
use crate::throttle::{Sleeper, Throttle, TokioSleeper};

mod activation;
mod cooldown;
mod dispatch;
mod membership;
mod notify;
mod propagation;

/// Moderation logic of one shard.
///
/// Every process runs one instance for the servers its platform session
/// sees. The control process wraps it into a [`ControlInstance`].
///
/// [`ControlInstance`]: crate::ControlInstance
#[derive(Clone)]
pub struct BotInstance {
    inner: Arc<Inner>,
}

struct Inner {
    shard_id: ShardId,
    config: FleetConfig,
    storage: Arc<dyn Storage>,
    platform: Arc<dyn Platform>,
    executor: ActionExecutor,
    sleeper: Arc<dyn Sleeper>,
    tasks: TaskTracker,
    relay: ArcSwapOption<RelaySender>,
}

impl BotInstance {
    pub fn builder(
        shard_id: ShardId,
        config: FleetConfig,
        storage: Arc<dyn Storage>,
        platform: Arc<dyn Platform>,
    ) -> BotInstanceBuilder {
        BotInstanceBuilder {
            shard_id,
            config,
            storage,
            platform,
            sleeper: None,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.inner.shard_id
    }

    pub fn is_control(&self) -> bool {
        self.inner.config.is_control(self.inner.shard_id)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.inner.platform
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.inner.executor
    }

    pub fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    /// Sender of the current relay connection.
    pub fn relay(&self) -> Option<Arc<RelaySender>> {
        self.inner.relay.load_full()
    }

    pub fn set_relay(&self, sender: Option<RelaySender>) {
        self.inner.relay.store(sender.map(Arc::new));
    }

    fn new_throttle(&self) -> Throttle {
        Throttle::new(&self.inner.config.throttle, self.inner.sleeper.clone())
    }
}

pub struct BotInstanceBuilder {
    shard_id: ShardId,
    config: FleetConfig,
    storage: Arc<dyn Storage>,
    platform: Arc<dyn Platform>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl BotInstanceBuilder {
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn build(self) -> BotInstance {
        let executor = ActionExecutor::new(self.platform.clone(), self.config.development_mode);
        if executor.is_dry_run() {
            tracing::warn!(shard_id = self.shard_id, "development mode, moderation actions are dropped");
        }

        BotInstance {
            inner: Arc::new(Inner {
                shard_id: self.shard_id,
                config: self.config,
                storage: self.storage,
                platform: self.platform,
                executor,
                sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
                tasks: TaskTracker::new(),
                relay: ArcSwapOption::empty(),
            }),
        }
    }
}
