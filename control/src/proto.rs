use fleetguard_core::{BanResult, FleetStatus, IdleCleanupReport};
use fleetguard_storage::{BanAction, BanRecord, CooldownRecord, ServerId, ShardId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ServerResult;

#[tarpc::service]
pub trait ControlServer {
    /// Ping the control process. Returns its timestamp in milliseconds.
    async fn ping() -> u64;

    /// Relay, shard and storage counters.
    async fn get_status() -> ServerResult<FleetStatus>;

    /// Add a user to the ban list and propagate the ban.
    async fn ban_user(req: BanUserRequest) -> ServerResult<BanAction>;

    /// Remove a user from the ban list and propagate the unban.
    async fn unban_user(req: UnbanUserRequest) -> ServerResult<BanAction>;

    async fn lookup_ban(user_id: UserId) -> ServerResult<Option<BanRecord>>;

    /// Replay the newest `last_actions` bans (all when zero) in one server.
    async fn reprocess_server(req: ReprocessServerRequest) -> ServerResult<BanResult>;

    /// Replay the newest `last_actions` bans in every server of a shard.
    /// Returns whether the request was delivered.
    async fn reprocess_instance(req: ReprocessInstanceRequest) -> ServerResult<bool>;

    /// Returns whether the leave request was accepted by the owner shard.
    async fn leave_server(server_id: ServerId) -> ServerResult<bool>;

    /// Activate every server where the user has elevated permissions.
    /// Returns the number of servers activated by the control shard.
    async fn activate_user(user_id: UserId) -> ServerResult<usize>;

    async fn deactivate_user(user_id: UserId) -> ServerResult<usize>;

    async fn activate_server(req: ActivateServerRequest) -> ServerResult<bool>;

    async fn list_cooldowns() -> ServerResult<Vec<CooldownRecord>>;

    /// Queue every pending cooldown. Returns the number of queued servers.
    async fn run_cooldown_sweep() -> ServerResult<usize>;

    async fn run_inactive_cleanup(dry_run: bool) -> ServerResult<IdleCleanupReport>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratorInfo {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanUserRequest {
    pub user_id: UserId,
    pub moderator: ModeratorInfo,
    pub evidence_thread: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnbanUserRequest {
    pub user_id: UserId,
    pub moderator: ModeratorInfo,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReprocessServerRequest {
    pub server_id: ServerId,
    pub last_actions: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReprocessInstanceRequest {
    pub shard_id: ShardId,
    pub last_actions: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActivateServerRequest {
    pub user_id: UserId,
    pub server_id: ServerId,
}
