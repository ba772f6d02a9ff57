use anyhow::Result;
use fleetguard_storage::UserId;

use super::BotInstance;
use crate::executor::{BanResult, ModerationAction};
use crate::platform::{OutgoingMessage, ServerInfo};

const PERMISSIONS_ERROR: &str = "The fleet does not have significant permissions to ban this user";
const PERMISSIONS_RESOLUTION: &str = "This usually happens if the user in question has grabbed \
    roles that are higher than the bot's. Move the bot role above them or give the bot a \
    moderation role.";
const UNKNOWN_ERROR: &str = "The fleet encountered an unknown error";
const UNKNOWN_RESOLUTION: &str =
    "This can happen when the platform API has a hiccup, the ban will be retried soon.";

impl BotInstance {
    pub(crate) fn schedule_ban_failure_notice(
        &self,
        server: ServerInfo,
        user_id: UserId,
        result: BanResult,
        action: ModerationAction,
    ) {
        let this = self.clone();
        self.tasks().spawn("ban_failure_notice", async move {
            this.post_ban_failure_information(&server, user_id, result, action)
                .await
                .map(|_| ())
        });
    }

    /// Tells the moderators of the server that an action failed.
    ///
    /// Only permission loss and unknown errors are reported. Returns whether
    /// a message was sent.
    pub async fn post_ban_failure_information(
        &self,
        server: &ServerInfo,
        user_id: UserId,
        result: BanResult,
        action: ModerationAction,
    ) -> Result<bool> {
        if !self.config().can_send_server_error_messages {
            return Ok(false);
        }

        let (error, resolution) = match result {
            BanResult::LostPermissions => (PERMISSIONS_ERROR, PERMISSIONS_RESOLUTION),
            BanResult::Error | BanResult::BansExceeded => (UNKNOWN_ERROR, UNKNOWN_RESOLUTION),
            _ => return Ok(false),
        };

        let Some(channel_id) = self.storage().get_channel_id_for_server(server.id)? else {
            return Ok(false);
        };

        let mut body = String::new();
        if let Ok(member) = self.platform().fetch_member(server.id, user_id).await {
            body.push_str(&format!("User: {}\n", member.user.name));
        }
        body.push_str(&format!(
            "User ID: {user_id}\nIs Ban: {}\nError Code: {error}\nResolution: {resolution}",
            action == ModerationAction::Ban
        ));

        let message = OutgoingMessage {
            title: format!("WARNING: Failed to {action} user!"),
            body,
        };

        match self.platform().send_message(channel_id, &message).await {
            Ok(()) => {
                tracing::info!(server = %server, user_id, %result, "ban failure message sent");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(server = %server, channel_id, "failed to send ban failure message: {e}");
                Ok(false)
            }
        }
    }

    /// Posts an operational alert to the notification channel.
    pub async fn post_notification(&self, text: &str) -> bool {
        let Some(channel_id) = self.config().notification_channel else {
            return false;
        };

        let message = OutgoingMessage {
            title: format!("Shard #{}", self.shard_id()),
            body: text.to_owned(),
        };
        match self.platform().send_message(channel_id, &message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel_id, "failed to post notification: {e}");
                false
            }
        }
    }
}
