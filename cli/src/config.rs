use std::path::Path;

use anyhow::Result;
use fleetguard_control::ControlServerConfig;
use fleetguard_core::FleetConfig;
use fleetguard_util::cli::logger::LoggerConfig;
use fleetguard_util::serde_helpers;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    #[serde(flatten)]
    pub fleet: FleetConfig,

    pub logger: LoggerConfig,

    /// Operator endpoint settings. The endpoint is started only when
    /// `control_socket` is set.
    pub control_endpoint: ControlServerConfig,

    /// Servers and users of the local platform sessions.
    ///
    /// Default: `None` (every shard starts without servers).
    pub platform_fixture: Option<std::path::PathBuf>,
}

impl CliConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config: Self = serde_helpers::load_json_from_file(path)?;
        config.fleet.apply_env();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fleet_fields_are_flattened() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "worker_shards": [1, 2],
                "cooldown_sweep_interval": "10m",
                "relay": { "address": "unix:/tmp/fleet.sock" },
                "control_socket": "/tmp/control.sock",
                "platform_fixture": "fixture.json"
            }"#,
        )?;

        let config = CliConfig::from_file(&path)?;
        assert_eq!(config.fleet.worker_shards, vec![1, 2]);
        assert_eq!(config.fleet.cooldown_sweep_interval, Duration::from_secs(600));
        assert!(config.fleet.relay.address.is_some());
        assert!(config.fleet.control_socket.is_some());
        assert!(config.platform_fixture.is_some());
        assert_eq!(config.logger.outputs.len(), 1);
        assert!(!config.control_endpoint.overwrite_socket);
        Ok(())
    }
}
