use anyhow::Result;
use fleetguard_storage::{ServerId, UserId};

use super::BotInstance;
use crate::executor::{BanResult, ModerationAction};
use crate::platform::ServerInfo;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PropagationSummary {
    /// Activated servers of the shard.
    pub servers: usize,
    /// Servers where the action succeeded.
    pub performed: usize,
    /// The loop stopped on an invalid target.
    pub halted: bool,
}

impl BotInstance {
    pub fn ban_user(&self, target: UserId, auth_name: String) {
        self.schedule_action_on_user(target, auth_name, ModerationAction::Ban);
    }

    pub fn unban_user(&self, target: UserId, auth_name: String) {
        self.schedule_action_on_user(target, auth_name, ModerationAction::Unban);
    }

    fn schedule_action_on_user(&self, target: UserId, auth_name: String, action: ModerationAction) {
        let this = self.clone();
        self.tasks().spawn("process_action_on_user", async move {
            this.process_action_on_user(target, &auth_name, action)
                .await
                .map(|_| ())
        });
    }

    /// Applies the action in every activated server of this shard.
    pub async fn process_action_on_user(
        &self,
        target: UserId,
        auth_name: &str,
        action: ModerationAction,
    ) -> Result<PropagationSummary> {
        let shard_id = self.shard_id();
        let storage = self.storage();
        let reason = action_reason(action, auth_name);

        let servers = storage.get_all_activated_servers_with_bans(shard_id)?;

        // Cooldowns resume from the ban before the one which hit the quota
        let ban_index = match action {
            ModerationAction::Ban => match storage.get_ban_position(target)? {
                Some(index) => index,
                None => storage.get_num_bans()?.saturating_sub(1),
            },
            ModerationAction::Unban | ModerationAction::Kick => 0,
        };

        let mut summary = PropagationSummary {
            servers: servers.len(),
            ..Default::default()
        };

        let mut throttle = self.new_throttle();
        for record in servers {
            let Some(server) = self.platform().get_server(record.server_id) else {
                tracing::warn!(
                    shard_id,
                    server_id = record.server_id,
                    "server did not respond on a lookup"
                );
                continue;
            };

            let result = self.executor().perform(&server, target, &reason, action).await;
            throttle.record().await;

            match result {
                BanResult::Processed | BanResult::NotBanned => summary.performed += 1,
                BanResult::InvalidUser => {
                    tracing::warn!(shard_id, user_id = target, server = %server, "invalid target, stopping propagation");
                    summary.halted = true;
                    break;
                }
                BanResult::ServerOwner => {
                    tracing::error!(shard_id, user_id = target, server = %server, "attempted to {action} a server owner");
                }
                BanResult::BansExceeded if action == ModerationAction::Ban => {
                    self.enter_cooldown(server.id, ban_index)?;
                }
                BanResult::LostPermissions | BanResult::Error | BanResult::BansExceeded => {
                    self.schedule_ban_failure_notice(server, target, result, action);
                }
                BanResult::ServiceError => {
                    self.schedule_service_error_retry(server, target, reason.clone(), action);
                }
            }
        }

        tracing::info!(
            shard_id,
            user_id = target,
            %action,
            performed = summary.performed,
            servers = summary.servers,
            halted = summary.halted,
            "action execution finished"
        );
        Ok(summary)
    }

    fn enter_cooldown(&self, server_id: ServerId, failed_index: usize) -> Result<()> {
        let position = failed_index.saturating_sub(1) as u64;
        if self.storage().add_server_cooldown(server_id, position)? {
            tracing::warn!(
                shard_id = self.shard_id(),
                server_id,
                position,
                "server entered cooldown"
            );
        } else {
            tracing::debug!(shard_id = self.shard_id(), server_id, "server is already in cooldown");
        }
        Ok(())
    }

    /// Retries the action once after `service_error_retry_delay`.
    fn schedule_service_error_retry(
        &self,
        server: ServerInfo,
        target: UserId,
        reason: String,
        action: ModerationAction,
    ) {
        let this = self.clone();
        let delay = self.config().service_error_retry_delay;
        tracing::info!(
            server = %server,
            user_id = target,
            %action,
            "platform outage, retrying in {}",
            humantime::format_duration(delay)
        );

        self.tasks().spawn("service_error_retry", async move {
            tokio::time::sleep(delay).await;

            let result = this.executor().perform(&server, target, &reason, action).await;
            if result.is_success() {
                tracing::info!(server = %server, user_id = target, %action, "retry succeeded");
            } else {
                tracing::warn!(server = %server, user_id = target, %action, %result, "retry failed");
                this.post_ban_failure_information(&server, target, result, action)
                    .await?;
            }
            Ok(())
        });
    }
}

pub(crate) fn action_reason(action: ModerationAction, auth_name: &str) -> String {
    let kind = match action {
        ModerationAction::Unban => "non-scammer",
        ModerationAction::Ban | ModerationAction::Kick => "scammer",
    };
    format!("Confirmed {kind} by {auth_name}")
}

pub(crate) fn replay_reason(assigner_name: &str) -> String {
    format!("User banned by {assigner_name}")
}
