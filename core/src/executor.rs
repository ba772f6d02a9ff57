use std::sync::Arc;

use fleetguard_storage::UserId;
use serde::{Deserialize, Serialize};

use crate::platform::{Platform, PlatformError, ServerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationAction {
    Ban,
    Unban,
    Kick,
}

impl std::fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Kick => "kick",
        })
    }
}

/// Outcome of one moderation action in one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BanResult {
    Processed,
    /// Unban of a user which is not banned.
    NotBanned,
    /// The target does not exist.
    InvalidUser,
    LostPermissions,
    /// The server moderation quota is exhausted.
    BansExceeded,
    /// The target owns the server.
    ServerOwner,
    /// Transient platform outage.
    ServiceError,
    Error,
}

impl BanResult {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Processed | Self::NotBanned)
    }
}

impl std::fmt::Display for BanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Performs single moderation actions and classifies their outcome.
#[derive(Clone)]
pub struct ActionExecutor {
    platform: Arc<dyn Platform>,
    dry_run: bool,
}

impl ActionExecutor {
    pub fn new(platform: Arc<dyn Platform>, dry_run: bool) -> Self {
        Self { platform, dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Never retries. Retry policy belongs to the caller.
    pub async fn perform(
        &self,
        server: &ServerInfo,
        target: UserId,
        reason: &str,
        action: ModerationAction,
    ) -> BanResult {
        tracing::debug!(
            server_id = server.id,
            owner_id = server.owner_id,
            user_id = target,
            %action,
            "performing moderation action"
        );

        if target == server.owner_id {
            tracing::warn!(server_id = server.id, user_id = target, %action, "target owns the server, dropped");
            return BanResult::ServerOwner;
        }

        if self.dry_run {
            tracing::trace!(server_id = server.id, user_id = target, %action, "dropped in development mode");
            return BanResult::Processed;
        }

        let res = match action {
            ModerationAction::Ban => self.platform.ban(server.id, target, reason).await,
            ModerationAction::Unban => self.platform.unban(server.id, target, reason).await,
            ModerationAction::Kick => self.platform.kick(server.id, target, reason).await,
        };

        match res {
            Ok(()) => BanResult::Processed,
            Err(e) => {
                let result = classify(action, &e);
                match result {
                    BanResult::NotBanned | BanResult::Processed => {
                        tracing::debug!(server_id = server.id, user_id = target, %action, %result, "{e}");
                    }
                    BanResult::LostPermissions | BanResult::Error => {
                        tracing::error!(server = %server, user_id = target, %action, %result, "moderation action failed: {e}");
                    }
                    _ => {
                        tracing::warn!(server = %server, user_id = target, %action, %result, "moderation action failed: {e}");
                    }
                }
                result
            }
        }
    }
}

fn classify(action: ModerationAction, error: &PlatformError) -> BanResult {
    match error {
        PlatformError::NotFound => match action {
            ModerationAction::Ban => BanResult::InvalidUser,
            ModerationAction::Unban => BanResult::NotBanned,
            // NOTE: nothing to kick
            ModerationAction::Kick => BanResult::Processed,
        },
        PlatformError::Forbidden => match action {
            ModerationAction::Kick => BanResult::Processed,
            ModerationAction::Ban | ModerationAction::Unban => BanResult::LostPermissions,
        },
        e if e.is_quota_exceeded() => BanResult::BansExceeded,
        e if e.is_server_error() => BanResult::ServiceError,
        PlatformError::Http { .. } => BanResult::Error,
    }
}
