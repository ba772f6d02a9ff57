#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fleetguard_core::platform::{LocalPlatform, PlatformCall, ServerInfo, UserInfo};
use fleetguard_core::{
    BotInstance, ControlInstance, CountingSleeper, FleetConfig, WorkerSupervisor,
};
use fleetguard_storage::{MemoryStorage, NewServer, ServerId, ShardId, Storage, UserId};

pub const MODERATOR: UserId = 1;
pub const FIRST_BANNED_USER: UserId = 10_000;

pub fn test_config() -> FleetConfig {
    let mut config = FleetConfig {
        service_error_retry_delay: Duration::from_millis(20),
        ..Default::default()
    };
    config.relay.tick_interval = Duration::from_millis(10);
    config
}

pub fn moderator() -> UserInfo {
    UserInfo {
        id: MODERATOR,
        name: "moderator".to_owned(),
    }
}

pub fn server_info(id: ServerId, owner_id: UserId) -> ServerInfo {
    ServerInfo {
        id,
        name: format!("server-{id}"),
        owner_id,
    }
}

pub struct Shard {
    pub bot: BotInstance,
    pub platform: Arc<LocalPlatform>,
    pub sleeper: Arc<CountingSleeper>,
}

impl Shard {
    pub fn new(shard_id: ShardId, config: FleetConfig, storage: Arc<dyn Storage>) -> Self {
        Self::with_platform(shard_id, config, storage, Arc::new(LocalPlatform::new()))
    }

    pub fn with_platform(
        shard_id: ShardId,
        config: FleetConfig,
        storage: Arc<dyn Storage>,
        platform: Arc<LocalPlatform>,
    ) -> Self {
        let sleeper = Arc::new(CountingSleeper::default());
        let bot = BotInstance::builder(shard_id, config, storage, platform.clone())
            .with_sleeper(sleeper.clone())
            .build();
        Self {
            bot,
            platform,
            sleeper,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        self.bot.storage()
    }

    /// Adds a live server to the platform and an activated record to the storage.
    pub fn add_activated_server(&self, server_id: ServerId, owner_id: UserId) -> Result<ServerInfo> {
        let info = self.add_inactive_server(server_id, owner_id)?;
        self.storage()
            .set_activation(server_id, true, Some(owner_id))?;
        Ok(info)
    }

    pub fn add_inactive_server(&self, server_id: ServerId, owner_id: UserId) -> Result<ServerInfo> {
        let info = server_info(server_id, owner_id);
        self.platform.add_server(info.clone());
        self.storage().add_servers(&[NewServer {
            server_id,
            shard_id: self.bot.shard_id(),
            owner_id,
        }])?;
        Ok(info)
    }

    pub async fn settle(&self) {
        self.bot.tasks().wait_idle().await;
    }
}

pub fn memory_storage() -> Arc<dyn Storage> {
    Arc::new(MemoryStorage::new())
}

/// Adds `count` bans oldest-first. Returns the banned users in ban list order.
pub fn add_bans(storage: &dyn Storage, count: usize) -> Result<Vec<UserId>> {
    let mut users = Vec::with_capacity(count);
    for i in 0..count as u64 {
        let user_id = FIRST_BANNED_USER + i;
        storage.add_ban(user_id, "moderator", MODERATOR, None)?;
        users.push(user_id);
    }
    Ok(users)
}

/// Users banned in the server, in call order, including failed attempts.
pub fn ban_calls(platform: &LocalPlatform, server_id: ServerId) -> Vec<UserId> {
    platform
        .calls_for(server_id)
        .into_iter()
        .filter_map(|call| match call {
            PlatformCall::Ban { user_id, .. } => Some(user_id),
            _ => None,
        })
        .collect()
}

pub fn control(shard: &Shard) -> Result<ControlInstance> {
    let supervisor = WorkerSupervisor::new(
        Vec::new(),
        Arc::new(|shard_id: ShardId| -> Result<BotInstance> {
            anyhow::bail!("no worker factory for shard {shard_id}")
        }),
    );
    ControlInstance::new(shard.bot.clone(), Arc::new(supervisor))
}

/// Polls `done` until it holds.
pub async fn wait_until<F>(mut done: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if done() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("condition not reached in time")
}
