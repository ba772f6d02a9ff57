use std::time::Duration;

use fleetguard_util::serde_helpers;
use serde::{Deserialize, Serialize};

use crate::transport::{DEFAULT_MAX_FRAME_LENGTH, RelayAddress};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address of the relay server.
    ///
    /// Default: a per-process unix socket in the temp dir.
    pub address: Option<RelayAddress>,

    /// How often the relay server and every client poll their connections.
    ///
    /// Default: 500ms.
    #[serde(with = "serde_helpers::humantime")]
    pub tick_interval: Duration,

    /// Default: 1 MiB.
    pub max_frame_length: usize,
}

impl RelayConfig {
    pub fn address_or_default(&self) -> RelayAddress {
        self.address
            .clone()
            .unwrap_or_else(RelayAddress::default_for_process)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: None,
            tick_interval: Duration::from_millis(500),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}
