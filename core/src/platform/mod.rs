use async_trait::async_trait;
use fleetguard_storage::{ChannelId, ServerId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use self::local::{FixtureMember, FixtureServer, LocalPlatform, PlatformCall, PlatformFixture};

mod local;

/// Chat platform session of one shard.
///
/// Every remote call is fallible. The executor turns [`PlatformError`]
/// into a [`BanResult`] and nothing else interprets it.
///
/// [`BanResult`]: crate::BanResult
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    /// Servers this session is currently a member of.
    fn servers(&self) -> Vec<ServerInfo>;

    /// Cached server lookup.
    fn get_server(&self, server_id: ServerId) -> Option<ServerInfo>;

    async fn ban(&self, server_id: ServerId, user_id: UserId, reason: &str) -> PlatformResult<()>;

    async fn unban(&self, server_id: ServerId, user_id: UserId, reason: &str)
    -> PlatformResult<()>;

    async fn kick(&self, server_id: ServerId, user_id: UserId, reason: &str) -> PlatformResult<()>;

    async fn fetch_user(&self, user_id: UserId) -> PlatformResult<UserInfo>;

    async fn fetch_member(&self, server_id: ServerId, user_id: UserId)
    -> PlatformResult<MemberInfo>;

    /// Whether the user may activate the fleet in the server.
    async fn has_elevated_permissions(&self, server_id: ServerId, user_id: UserId) -> bool {
        match self.fetch_member(server_id, user_id).await {
            Ok(member) => member.permissions.is_elevated(),
            Err(PlatformError::NotFound) => {
                tracing::debug!(server_id, user_id, "user is not a member of the server");
                false
            }
            Err(e) => {
                tracing::warn!(server_id, user_id, "failed to fetch member: {e}");
                false
            }
        }
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> PlatformResult<()>;

    async fn leave_server(&self, server_id: ServerId) -> PlatformResult<()>;

    /// Takes the membership event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
}

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberPermissions {
    pub administrator: bool,
    pub manage_server: bool,
    pub ban_members: bool,
}

impl MemberPermissions {
    pub fn is_elevated(&self) -> bool {
        self.administrator || (self.manage_server && self.ban_members)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub server_id: ServerId,
    pub user: UserInfo,
    pub permissions: MemberPermissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The session is connected and the server cache is filled.
    Ready,
    ServerJoined(ServerInfo),
    ServerRemoved(ServerInfo),
    ServerUpdated {
        before: ServerInfo,
        after: ServerInfo,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("http status {status}, code {code}")]
    Http { status: u16, code: u32 },
}

impl PlatformError {
    /// Too many moderation actions in a short window for one server.
    pub const TOO_MANY_MODERATION_ACTIONS: u32 = 30035;

    pub fn quota_exceeded() -> Self {
        Self::Http {
            status: 400,
            code: Self::TOO_MANY_MODERATION_ACTIONS,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::Http { code, .. } if *code == Self::TOO_MANY_MODERATION_ACTIONS)
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status >= 500)
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_permissions() {
        let admin = MemberPermissions {
            administrator: true,
            ..Default::default()
        };
        assert!(admin.is_elevated());

        let moderator = MemberPermissions {
            manage_server: true,
            ban_members: true,
            ..Default::default()
        };
        assert!(moderator.is_elevated());

        let helper = MemberPermissions {
            ban_members: true,
            ..Default::default()
        };
        assert!(!helper.is_elevated());
    }

    #[test]
    fn error_classes() {
        assert!(PlatformError::quota_exceeded().is_quota_exceeded());
        assert!(!PlatformError::quota_exceeded().is_server_error());

        let outage = PlatformError::Http {
            status: 503,
            code: 0,
        };
        assert!(outage.is_server_error());
        assert!(!outage.is_quota_exceeded());
        assert!(!PlatformError::Forbidden.is_server_error());
    }
}
