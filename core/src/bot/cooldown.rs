use anyhow::Result;
use fleetguard_storage::{BanRecord, ServerId, Storage};

use super::BotInstance;
use super::propagation::replay_reason;
use crate::executor::{BanResult, ModerationAction};

impl BotInstance {
    pub fn schedule_reprocess_bans(&self, server_id: ServerId, last_actions: u64, handling_cooldown: bool) {
        let this = self.clone();
        self.tasks().spawn("reprocess_bans", async move {
            this.reprocess_bans(server_id, last_actions, handling_cooldown)
                .await
                .map(|_| ())
        });
    }

    pub fn schedule_reprocess_instance(&self, last_actions: u64) {
        let this = self.clone();
        self.tasks().spawn("reprocess_instance", async move {
            this.reprocess_instance(last_actions).await
        });
    }

    /// Replays the last `last_actions` bans (all when zero) oldest-first in one server.
    ///
    /// With `handling_cooldown` the pass continues a cooldown and updates
    /// its record. A quota hit always records the resume position.
    pub async fn reprocess_bans(
        &self,
        server_id: ServerId,
        last_actions: u64,
        handling_cooldown: bool,
    ) -> Result<BanResult> {
        let res = self
            .reprocess_bans_impl(server_id, last_actions, handling_cooldown)
            .await;
        if res.is_err() && handling_cooldown {
            // NOTE: the next sweep skips records which are still marked
            if let Err(e) = self.storage().set_processing_server_cooldown(server_id, false) {
                tracing::error!(server_id, "failed to release the cooldown: {e:?}");
            }
        }
        res
    }

    async fn reprocess_bans_impl(
        &self,
        server_id: ServerId,
        last_actions: u64,
        handling_cooldown: bool,
    ) -> Result<BanResult> {
        let shard_id = self.shard_id();
        let storage = self.storage();
        let config = self.config();

        let Some(server) = self.platform().get_server(server_id) else {
            tracing::error!(shard_id, server_id, "could not look up the server while reprocessing bans");
            if handling_cooldown {
                storage.set_processing_server_cooldown(server_id, false)?;
            }
            return Ok(BanResult::Error);
        };

        let (offset, bans) = last_bans_ascending(storage.as_ref(), last_actions)?;
        tracing::info!(shard_id, server = %server, offset, bans = bans.len(), handling_cooldown, "importing ban data");

        let max_failures = config.max_ban_failures;
        let max_imports = config.max_bulk_imports as usize;

        let mut result = BanResult::Processed;
        let mut stopped_at = None;
        let mut processed = 0usize;
        let mut failures = 0u32;

        let mut throttle = self.new_throttle();
        for (i, ban) in bans.iter().enumerate() {
            let index = offset + i;

            if max_imports > 0 && processed >= max_imports {
                tracing::info!(shard_id, server = %server, processed, "bulk import limit reached");
                result = BanResult::BansExceeded;
                stopped_at = Some(index);
                break;
            }

            let reason = replay_reason(&ban.assigner_name);
            let ban_result = self
                .executor()
                .perform(&server, ban.user_id, &reason, ModerationAction::Ban)
                .await;
            throttle.record().await;

            if ban_result.is_success() {
                processed += 1;
                continue;
            }

            failures += 1;
            self.schedule_ban_failure_notice(server.clone(), ban.user_id, ban_result, ModerationAction::Ban);

            if matches!(ban_result, BanResult::LostPermissions | BanResult::BansExceeded) {
                tracing::error!(shard_id, server = %server, user_id = ban.user_id, result = %ban_result, "unable to process ban");
                result = ban_result;
                stopped_at = Some(index);
                break;
            }

            if max_failures > 0 && failures > max_failures {
                tracing::warn!(shard_id, server = %server, failures, "too many ban failures, stopping the pass");
                self.post_notification(&format!(
                    "Ban failures reached {failures} for server {server}, the pass was stopped"
                ))
                .await;
                result = BanResult::Error;
                break;
            }
        }

        tracing::info!(
            shard_id,
            server = %server,
            processed,
            total = bans.len(),
            %result,
            "ban import finished"
        );

        self.update_cooldown(server_id, result, stopped_at, handling_cooldown)?;
        Ok(result)
    }

    fn update_cooldown(
        &self,
        server_id: ServerId,
        result: BanResult,
        stopped_at: Option<usize>,
        handling_cooldown: bool,
    ) -> Result<()> {
        let storage = self.storage();
        let existing = storage.get_cooldown(server_id)?;

        match (result, stopped_at) {
            (BanResult::Processed, _) if handling_cooldown => {
                if storage.remove_server_cooldown(server_id)? {
                    tracing::info!(server_id, "server left cooldown");
                }
            }
            (BanResult::BansExceeded, Some(index)) => {
                let position = resume_position(index, existing.map(|c| c.current_position));
                storage.update_server_cooldown(server_id, position)?;
                tracing::warn!(server_id, position, "server is in cooldown");
            }
            (BanResult::LostPermissions, Some(index)) if existing.is_some() => {
                let position = resume_position(index, existing.map(|c| c.current_position));
                storage.update_server_cooldown(server_id, position)?;
            }
            _ if handling_cooldown => {
                storage.set_processing_server_cooldown(server_id, false)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Replays the last `last_actions` bans (all when zero) in every server of the shard.
    pub async fn reprocess_instance(&self, last_actions: u64) -> Result<()> {
        let (_, bans) = last_bans_ascending(self.storage().as_ref(), last_actions)?;
        tracing::info!(shard_id = self.shard_id(), bans = bans.len(), "reprocessing instance");

        for ban in bans {
            self.process_action_on_user(ban.user_id, &ban.assigner_name, ModerationAction::Ban)
                .await?;
        }
        Ok(())
    }
}

/// The last `count` bans oldest-first with the index of the first one.
pub(crate) fn last_bans_ascending(
    storage: &dyn Storage,
    count: u64,
) -> Result<(usize, Vec<BanRecord>)> {
    let total = storage.get_num_bans()?;
    let count = match usize::try_from(count) {
        Ok(0) | Err(_) => total,
        Ok(count) => count.min(total),
    };
    let offset = total - count;
    Ok((offset, storage.get_bans_ascending(offset, count)?))
}

/// Resumes from the ban before the failed one, never moving backwards.
fn resume_position(failed_index: usize, previous: Option<u64>) -> u64 {
    let position = failed_index.saturating_sub(1) as u64;
    position.max(previous.unwrap_or_default())
}
