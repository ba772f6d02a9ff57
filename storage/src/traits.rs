use std::path::{Path, PathBuf};

use fleetguard_util::FastHashSet;
use fleetguard_util::time::now_sec;

use crate::error::StorageResult;
use crate::models::*;

/// Ban list, server assignments and cooldowns.
///
/// All calls are synchronous read-modify-write operations without
/// cross-call transactions. Each shard owns a disjoint set of servers,
/// so concurrent writers never touch the same server record.
pub trait Storage: Send + Sync + 'static {
    // === Bans ===

    /// With `limit > 0` returns the newest `limit` bans, newest first.
    /// With `limit == 0` returns every ban, oldest first.
    fn get_all_bans(&self, limit: usize) -> StorageResult<Vec<BanRecord>>;

    /// Oldest-first slice of the ban list.
    fn get_bans_ascending(&self, offset: usize, limit: usize) -> StorageResult<Vec<BanRecord>>;

    fn get_ban(&self, user_id: UserId) -> StorageResult<Option<BanRecord>>;

    /// Index of the ban in the oldest-first ban list.
    fn get_ban_position(&self, user_id: UserId) -> StorageResult<Option<usize>>;

    fn get_num_bans(&self) -> StorageResult<usize>;

    /// Returns [`BanAction::Banned`] or [`BanAction::Duplicate`].
    fn add_ban(
        &self,
        user_id: UserId,
        assigner_name: &str,
        assigner_id: UserId,
        evidence_thread: Option<u64>,
    ) -> StorageResult<BanAction>;

    /// Returns [`BanAction::Unbanned`] or [`BanAction::NotExist`].
    fn remove_ban(&self, user_id: UserId) -> StorageResult<BanAction>;

    fn set_evidence_thread(&self, user_id: UserId, thread_id: u64) -> StorageResult<bool>;

    // === Servers ===

    fn get_server(&self, server_id: ServerId) -> StorageResult<Option<ServerRecord>>;

    /// Every server ordered by id.
    fn get_all_servers(&self) -> StorageResult<Vec<ServerRecord>>;

    fn put_server(&self, server: &ServerRecord) -> StorageResult<()>;

    fn delete_server(&self, server_id: ServerId) -> StorageResult<bool>;

    // === Cooldowns ===

    fn get_cooldown(&self, server_id: ServerId) -> StorageResult<Option<CooldownRecord>>;

    fn put_cooldown(&self, cooldown: &CooldownRecord) -> StorageResult<()>;

    fn delete_cooldown(&self, server_id: ServerId) -> StorageResult<bool>;

    /// Every cooldown ordered by server id.
    fn get_exhausted_servers(&self) -> StorageResult<Vec<CooldownRecord>>;

    // === Maintenance ===

    /// Writes a consistent copy of the storage into a new entry of `dir`.
    ///
    /// Returns `None` when the backend has nothing to back up.
    fn backup(&self, dir: &Path) -> StorageResult<Option<PathBuf>> {
        let _ = dir;
        Ok(None)
    }

    // === Provided ===

    fn get_bot_id_for_server(&self, server_id: ServerId) -> StorageResult<Option<ShardId>> {
        Ok(self.get_server(server_id)?.map(|s| s.shard_id))
    }

    fn get_channel_id_for_server(&self, server_id: ServerId) -> StorageResult<Option<ChannelId>> {
        Ok(self.get_server(server_id)?.and_then(|s| s.message_channel))
    }

    /// Activated servers of the shard which accept propagated bans.
    fn get_all_activated_servers_with_bans(
        &self,
        shard_id: ShardId,
    ) -> StorageResult<Vec<ServerRecord>> {
        let mut servers = self.get_all_servers()?;
        servers.retain(|s| s.shard_id == shard_id && s.activated && s.ban_enabled);
        Ok(servers)
    }

    fn get_all_deactivated_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        let mut servers = self.get_all_servers()?;
        servers.retain(|s| !s.activated);
        Ok(servers)
    }

    fn get_servers_for_shard(&self, shard_id: ShardId) -> StorageResult<Vec<ServerRecord>> {
        let mut servers = self.get_all_servers()?;
        servers.retain(|s| s.shard_id == shard_id);
        Ok(servers)
    }

    fn get_servers_of_owner(&self, owner_id: UserId) -> StorageResult<Vec<ServerRecord>> {
        let mut servers = self.get_all_servers()?;
        servers.retain(|s| s.owner_id == owner_id);
        Ok(servers)
    }

    /// Inserts inactive records for unknown servers. Returns the number of added servers.
    fn add_servers(&self, servers: &[NewServer]) -> StorageResult<usize> {
        let now = now_sec();
        let mut added = 0;
        for server in servers {
            if self.get_server(server.server_id)?.is_some() {
                continue;
            }
            self.put_server(&ServerRecord::new(server, now))?;
            added += 1;
        }
        Ok(added)
    }

    fn set_activation(
        &self,
        server_id: ServerId,
        activated: bool,
        activator_id: Option<UserId>,
    ) -> StorageResult<bool> {
        update_server(self, server_id, |server| {
            server.activated = activated;
            server.activator_id = activator_id;
        })
    }

    fn set_new_owner(&self, server_id: ServerId, owner_id: UserId) -> StorageResult<bool> {
        update_server(self, server_id, |server| server.owner_id = owner_id)
    }

    fn set_server_settings(
        &self,
        server_id: ServerId,
        settings: &ServerSettings,
    ) -> StorageResult<bool> {
        update_server(self, server_id, |server| {
            server.ban_enabled = settings.ban_enabled;
            server.message_channel = settings.message_channel;
        })
    }

    fn remove_server(&self, server_id: ServerId) -> StorageResult<bool> {
        self.delete_server(server_id)
    }

    fn is_in_server(&self, server_id: ServerId) -> StorageResult<bool> {
        Ok(self.get_server(server_id)?.is_some())
    }

    fn is_activated(&self, server_id: ServerId) -> StorageResult<bool> {
        Ok(self.get_server(server_id)?.is_some_and(|s| s.activated))
    }

    fn get_num_servers(&self) -> StorageResult<usize> {
        Ok(self.get_all_servers()?.len())
    }

    fn get_num_activated_servers(&self) -> StorageResult<usize> {
        Ok(self.get_all_servers()?.iter().filter(|s| s.activated).count())
    }

    /// Brings the records of one shard in line with its live membership.
    ///
    /// Live servers without a record are added as inactive entries.
    /// Records of the shard which are not live anymore are removed,
    /// except for the control server.
    fn reconcile_servers(
        &self,
        shard_id: ShardId,
        live: &[(ServerId, UserId)],
        control_server: Option<ServerId>,
    ) -> StorageResult<ReconcileSummary> {
        let new_servers = live
            .iter()
            .map(|&(server_id, owner_id)| NewServer {
                server_id,
                shard_id,
                owner_id,
            })
            .collect::<Vec<_>>();
        let added = self.add_servers(&new_servers)?;

        let live = live.iter().map(|(id, _)| *id).collect::<FastHashSet<_>>();
        let mut removed = 0;
        for server in self.get_servers_for_shard(shard_id)? {
            if Some(server.server_id) == control_server || live.contains(&server.server_id) {
                continue;
            }
            tracing::warn!(shard_id, server_id = server.server_id, "removing stale server");
            if self.delete_server(server.server_id)? {
                removed += 1;
            }
        }

        Ok(ReconcileSummary { added, removed })
    }

    /// Starts tracking a server. Returns `false` if it is already tracked.
    fn add_server_cooldown(&self, server_id: ServerId, position: u64) -> StorageResult<bool> {
        if self.get_cooldown(server_id)?.is_some() {
            return Ok(false);
        }
        self.put_cooldown(&CooldownRecord {
            server_id,
            current_position: position,
            last_run: now_sec(),
            processing: false,
        })?;
        Ok(true)
    }

    /// Moves the resume position and refreshes `last_run`, creating the record if needed.
    fn update_server_cooldown(&self, server_id: ServerId, position: u64) -> StorageResult<()> {
        self.put_cooldown(&CooldownRecord {
            server_id,
            current_position: position,
            last_run: now_sec(),
            processing: false,
        })
    }

    fn set_processing_server_cooldown(
        &self,
        server_id: ServerId,
        processing: bool,
    ) -> StorageResult<bool> {
        match self.get_cooldown(server_id)? {
            Some(mut cooldown) => {
                cooldown.processing = processing;
                self.put_cooldown(&cooldown)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_server_cooldown(&self, server_id: ServerId) -> StorageResult<bool> {
        self.delete_cooldown(server_id)
    }

    fn is_server_in_cooldown(&self, server_id: ServerId) -> StorageResult<bool> {
        Ok(self.get_cooldown(server_id)?.is_some())
    }

    /// Resets flags left by an interrupted run. Returns the number of reset records.
    fn clear_cooldown_processing_flags(&self) -> StorageResult<usize> {
        let mut cleared = 0;
        for mut cooldown in self.get_exhausted_servers()? {
            if cooldown.processing {
                cooldown.processing = false;
                self.put_cooldown(&cooldown)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

fn update_server<S, F>(storage: &S, server_id: ServerId, f: F) -> StorageResult<bool>
where
    S: Storage + ?Sized,
    F: FnOnce(&mut ServerRecord),
{
    let Some(mut server) = storage.get_server(server_id)? else {
        tracing::warn!(server_id, "attempted to update an unknown server");
        return Ok(false);
    };
    f(&mut server);
    server.updated_at = now_sec();
    storage.put_server(&server)?;
    Ok(true)
}
