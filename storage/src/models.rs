use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type ServerId = u64;
pub type ShardId = i32;
pub type ChannelId = u64;

/// A confirmed ban. Bans are ordered by `(created_at, seq)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub user_id: UserId,
    pub assigner_name: String,
    pub assigner_id: UserId,
    /// Unix time in milliseconds.
    pub created_at: u64,
    /// Unix time in milliseconds.
    pub updated_at: u64,
    pub evidence_thread: Option<u64>,
    /// Insertion sequence number, breaks ties between equal timestamps.
    pub seq: u64,
}

/// A chat server the fleet is present in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub server_id: ServerId,
    /// Shard which owns the server.
    pub shard_id: ShardId,
    pub owner_id: UserId,
    pub activated: bool,
    pub activator_id: Option<UserId>,
    /// Whether propagated bans are applied in this server.
    #[serde(default = "default_true")]
    pub ban_enabled: bool,
    /// Channel for moderator notices.
    #[serde(default)]
    pub message_channel: Option<ChannelId>,
    /// Unix time in seconds.
    pub created_at: u64,
    /// Unix time in seconds.
    pub updated_at: u64,
}

impl ServerRecord {
    pub fn new(server: &NewServer, now: u64) -> Self {
        Self {
            server_id: server.server_id,
            shard_id: server.shard_id,
            owner_id: server.owner_id,
            activated: false,
            activator_id: None,
            ban_enabled: true,
            message_channel: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewServer {
    pub server_id: ServerId,
    pub shard_id: ShardId,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub ban_enabled: bool,
    pub message_channel: Option<ChannelId>,
}

/// A server which hit the moderation quota mid-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub server_id: ServerId,
    /// Offset into the oldest-first ban list to resume from.
    pub current_position: u64,
    /// Unix time in seconds.
    pub last_run: u64,
    /// Set while a retry pass is queued or running.
    #[serde(default)]
    pub processing: bool,
}

/// Outcome of a ban list write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BanAction {
    Banned,
    Unbanned,
    Duplicate,
    NotExist,
    DBError,
}

impl BanAction {
    /// Whether the ban list was changed.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Banned | Self::Unbanned)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
}

fn default_true() -> bool {
    true
}
