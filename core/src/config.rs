use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fleetguard_relay::RelayConfig;
use fleetguard_storage::{ChannelId, ServerId, ShardId, StorageConfig};
use fleetguard_util::serde_helpers;
use serde::{Deserialize, Serialize};

/// Environment switch which forces the dry-run mode.
pub const DEVELOPMENT_MODE_ENV: &str = "DEVELOPMENT_MODE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Shard id of the control process.
    ///
    /// Default: 0.
    pub control_shard_id: ShardId,

    /// Worker shards started by the control process.
    pub worker_shards: Vec<ShardId>,

    /// Home server of the fleet. It is never removed during reconciliation.
    pub control_server: Option<ServerId>,

    /// Skip every platform moderation call and report success instead.
    ///
    /// Default: `false`.
    pub development_mode: bool,

    pub throttle: ThrottleConfig,

    /// Abort a replay pass after this many failed bans. Disabled when zero.
    ///
    /// Default: 0.
    pub max_ban_failures: u32,

    /// Maximum number of bans applied by one replay pass. Disabled when zero.
    ///
    /// Default: 0.
    pub max_bulk_imports: u32,

    /// Whether moderators are notified about failed actions in their servers.
    ///
    /// Default: `true`.
    pub can_send_server_error_messages: bool,

    /// Delay before the single retry of an action which hit a platform outage.
    ///
    /// Default: 30s.
    #[serde(with = "serde_helpers::humantime")]
    pub service_error_retry_delay: Duration,

    pub relay: RelayConfig,

    /// How often servers in cooldown are retried.
    ///
    /// Default: 1h.
    #[serde(with = "serde_helpers::humantime")]
    pub cooldown_sweep_interval: Duration,

    /// Channel for ban announcements.
    pub announcement_channel: Option<ChannelId>,

    /// Channel for operational alerts.
    pub notification_channel: Option<ChannelId>,

    /// Periodic storage backups. Disabled if `None`.
    pub backup: Option<BackupConfig>,

    /// Periodic cleanup of servers which were never activated. Disabled if `None`.
    pub idle_cleanup: Option<IdleCleanupConfig>,

    pub storage: StorageConfig,

    /// Unix socket of the operator control endpoint. Disabled if `None`.
    pub control_socket: Option<PathBuf>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            control_shard_id: 0,
            worker_shards: Vec::new(),
            control_server: None,
            development_mode: false,
            throttle: ThrottleConfig::default(),
            max_ban_failures: 0,
            max_bulk_imports: 0,
            can_send_server_error_messages: true,
            service_error_retry_delay: Duration::from_secs(30),
            relay: RelayConfig::default(),
            cooldown_sweep_interval: Duration::from_secs(3600),
            announcement_channel: None,
            notification_channel: None,
            backup: None,
            idle_cleanup: None,
            storage: StorageConfig::default(),
            control_socket: None,
        }
    }
}

impl FleetConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: Self = serde_helpers::load_json_from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Applies the `DEVELOPMENT_MODE` variable. Any value except `false` enables it.
    pub fn apply_env(&mut self) {
        if let Some(value) = std::env::var_os(DEVELOPMENT_MODE_ENV) {
            self.development_mode = !value.eq_ignore_ascii_case("false");
        }
    }

    pub fn is_control(&self, shard_id: ShardId) -> bool {
        shard_id == self.control_shard_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Default: `true`.
    pub use_sleep: bool,

    /// Number of actions between two sleeps.
    ///
    /// Default: 20.
    pub actions_per_tick: u32,

    /// Default: 2s.
    #[serde(with = "serde_helpers::humantime")]
    pub sleep_amount: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            use_sleep: true,
            actions_per_tick: 20,
            sleep_amount: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory with storage checkpoints.
    pub dir: PathBuf,

    /// Default: 12h.
    #[serde(with = "serde_helpers::humantime")]
    pub interval: Duration,

    /// Checkpoints older than this are removed after each backup.
    ///
    /// Default: 7 days.
    #[serde(with = "serde_helpers::humantime")]
    pub keep_for: Duration,

    /// Delay before the next attempt when the fleet is busy.
    ///
    /// Default: 5m.
    #[serde(with = "serde_helpers::humantime")]
    pub retry_interval: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backups"),
            interval: Duration::from_secs(12 * 3600),
            keep_for: Duration::from_secs(7 * 24 * 3600),
            retry_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleCleanupConfig {
    /// Default: 24h.
    #[serde(with = "serde_helpers::humantime")]
    pub interval: Duration,

    /// Servers which stay inactive for longer than this are left.
    ///
    /// Default: 14 days.
    #[serde(with = "serde_helpers::humantime")]
    pub inactive_window: Duration,

    /// Delay before the next attempt when the fleet is busy.
    ///
    /// Default: 5m.
    #[serde(with = "serde_helpers::humantime")]
    pub retry_interval: Duration,

    /// Pause between two leave requests.
    ///
    /// Default: 1s.
    #[serde(with = "serde_helpers::humantime")]
    pub leave_interval: Duration,
}

impl Default for IdleCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 3600),
            inactive_window: Duration::from_secs(14 * 24 * 3600),
            retry_interval: Duration::from_secs(300),
            leave_interval: Duration::from_secs(1),
        }
    }
}
