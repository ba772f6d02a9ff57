use anyhow::Result;
use fleetguard_relay::NO_SHARD;
use fleetguard_storage::{NewServer, ReconcileSummary, ServerId};

use super::BotInstance;
use crate::platform::ServerInfo;

impl BotInstance {
    /// Reconciles stored server records with the live membership of this shard.
    pub fn initialize(&self) -> Result<ReconcileSummary> {
        let live = self
            .platform()
            .servers()
            .iter()
            .map(|server| (server.id, server.owner_id))
            .collect::<Vec<_>>();

        let summary =
            self.storage()
                .reconcile_servers(self.shard_id(), &live, self.config().control_server)?;

        tracing::info!(
            shard_id = self.shard_id(),
            servers = live.len(),
            added = summary.added,
            removed = summary.removed,
            "server membership reconciled"
        );
        Ok(summary)
    }

    /// A server added the bot. Servers already owned by another shard are left.
    pub async fn on_server_joined(&self, server: &ServerInfo) -> Result<()> {
        if let Some(existing) = self.storage().get_server(server.id)? {
            tracing::warn!(
                shard_id = self.shard_id(),
                server = %server,
                owner_shard = existing.shard_id,
                "server is already tracked, leaving"
            );
            self.platform().leave_server(server.id).await?;
            return Ok(());
        }

        self.storage().add_servers(&[NewServer {
            server_id: server.id,
            shard_id: self.shard_id(),
            owner_id: server.owner_id,
        }])?;
        tracing::info!(shard_id = self.shard_id(), server = %server, "joined server");
        Ok(())
    }

    pub fn on_server_removed(&self, server_id: ServerId) -> Result<bool> {
        if !self.owns_server(server_id)? {
            return Ok(false);
        }

        self.storage().remove_server(server_id)?;
        self.storage().remove_server_cooldown(server_id)?;
        tracing::info!(shard_id = self.shard_id(), server_id, "removed from server");
        Ok(true)
    }

    pub fn on_server_updated(&self, before: &ServerInfo, after: &ServerInfo) -> Result<bool> {
        if before.owner_id == after.owner_id || !self.owns_server(after.id)? {
            return Ok(false);
        }

        tracing::info!(
            shard_id = self.shard_id(),
            server = %after,
            old_owner = before.owner_id,
            new_owner = after.owner_id,
            "server ownership changed"
        );
        Ok(self.storage().set_new_owner(after.id, after.owner_id)?)
    }

    /// Makes the shard which owns the server leave it.
    ///
    /// Returns `false` when the owner is unknown or unreachable.
    pub fn leave_server(&self, server_id: ServerId) -> Result<bool> {
        let shard_id = match self.storage().get_bot_id_for_server(server_id)? {
            None | Some(NO_SHARD) => {
                tracing::warn!(server_id, "no shard owns the server");
                return Ok(false);
            }
            Some(shard_id) => shard_id,
        };

        if shard_id == self.shard_id() {
            let this = self.clone();
            self.tasks().spawn("force_leave_server", async move {
                this.force_leave_server(server_id).await.map(|_| ())
            });
            return Ok(true);
        }

        let Some(relay) = self.relay() else {
            tracing::warn!(server_id, shard_id, "no relay connection to forward the leave");
            return Ok(false);
        };
        Ok(relay.send_leave_server(server_id, shard_id)?)
    }

    /// Leaves a server of this shard and drops its records.
    pub async fn force_leave_server(&self, server_id: ServerId) -> Result<bool> {
        if self.platform().get_server(server_id).is_none() {
            tracing::warn!(shard_id = self.shard_id(), server_id, "cannot leave an unknown server");
            return Ok(false);
        }

        self.platform().leave_server(server_id).await?;
        self.storage().remove_server(server_id)?;
        self.storage().remove_server_cooldown(server_id)?;
        tracing::info!(shard_id = self.shard_id(), server_id, "left server");
        Ok(true)
    }

    fn owns_server(&self, server_id: ServerId) -> Result<bool> {
        Ok(self.storage().get_bot_id_for_server(server_id)? == Some(self.shard_id()))
    }
}
