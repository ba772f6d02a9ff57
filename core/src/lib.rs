pub use self::bot::{BotInstance, BotInstanceBuilder, PropagationSummary};
pub use self::config::{
    BackupConfig, DEVELOPMENT_MODE_ENV, FleetConfig, IdleCleanupConfig, ThrottleConfig,
};
pub use self::control::{
    ControlInstance, FleetStatus, IdleCleanupReport, JobOutcome, WorkerFactory, WorkerSupervisor,
};
pub use self::executor::{ActionExecutor, BanResult, ModerationAction};
pub use self::tasks::TaskTracker;
#[cfg(any(test, feature = "test"))]
pub use self::throttle::CountingSleeper;
pub use self::throttle::{Sleeper, Throttle, TokioSleeper};

pub mod platform;

mod bot;
mod config;
mod control;
mod executor;
mod tasks;
mod throttle;
