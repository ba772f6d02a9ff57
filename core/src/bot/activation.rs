use anyhow::Result;
use fleetguard_storage::{NewServer, ServerId, UserId};

use super::BotInstance;
use crate::platform::ServerInfo;

impl BotInstance {
    /// Servers of this shard where the user is the owner or has elevated permissions.
    pub async fn servers_with_elevated_permissions(
        &self,
        user_id: UserId,
        skip_activated: bool,
    ) -> Result<Vec<ServerInfo>> {
        let mut result = Vec::new();
        for server in self.platform().servers() {
            if skip_activated && self.storage().is_activated(server.id)? {
                continue;
            }

            if server.owner_id == user_id
                || self
                    .platform()
                    .has_elevated_permissions(server.id, user_id)
                    .await
            {
                tracing::debug!(user_id, server = %server, "user has elevated permissions");
                result.push(server);
            }
        }
        Ok(result)
    }

    /// Activates every eligible server of the user and imports the ban list there.
    pub async fn activate_servers_with_permissions(&self, user_id: UserId) -> Result<usize> {
        let servers = self.servers_with_elevated_permissions(user_id, true).await?;
        tracing::info!(
            shard_id = self.shard_id(),
            user_id,
            servers = servers.len(),
            "activating servers"
        );

        for server in &servers {
            self.store_activation(server, true, user_id)?;
            self.schedule_reprocess_bans(server.id, 0, false);
        }
        Ok(servers.len())
    }

    /// Activates one server owned by this shard and imports the ban list there.
    pub fn activate_server_instance(&self, user_id: UserId, server_id: ServerId) -> Result<bool> {
        if self.storage().get_bot_id_for_server(server_id)? != Some(self.shard_id()) {
            return Ok(false);
        }

        tracing::info!(shard_id = self.shard_id(), server_id, user_id, "activating server");
        self.storage()
            .set_activation(server_id, true, Some(user_id))?;
        self.schedule_reprocess_bans(server_id, 0, false);
        Ok(true)
    }

    pub async fn deactivate_servers_with_permissions(&self, user_id: UserId) -> Result<usize> {
        let servers = self.servers_with_elevated_permissions(user_id, false).await?;
        for server in &servers {
            self.store_activation(server, false, user_id)?;
        }
        tracing::info!(
            shard_id = self.shard_id(),
            user_id,
            servers = servers.len(),
            "deactivated servers"
        );
        Ok(servers.len())
    }

    fn store_activation(&self, server: &ServerInfo, activated: bool, user_id: UserId) -> Result<()> {
        let storage = self.storage();
        if !storage.set_activation(server.id, activated, Some(user_id))? {
            storage.add_servers(&[NewServer {
                server_id: server.id,
                shard_id: self.shard_id(),
                owner_id: server.owner_id,
            }])?;
            storage.set_activation(server.id, activated, Some(user_id))?;
        }
        Ok(())
    }

    pub(crate) fn schedule_activation(&self, user_id: UserId) {
        let this = self.clone();
        self.tasks().spawn("activate_servers", async move {
            this.activate_servers_with_permissions(user_id)
                .await
                .map(|_| ())
        });
    }

    pub(crate) fn schedule_deactivation(&self, user_id: UserId) {
        let this = self.clone();
        self.tasks().spawn("deactivate_servers", async move {
            this.deactivate_servers_with_permissions(user_id)
                .await
                .map(|_| ())
        });
    }
}
