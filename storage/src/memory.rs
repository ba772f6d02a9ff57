use std::collections::BTreeMap;

use fleetguard_util::FastHashMap;
use fleetguard_util::time::now_millis;
use parking_lot::RwLock;

use crate::error::StorageResult;
use crate::models::*;
use crate::traits::Storage;

type BanKey = (u64, u64);

/// Process-local storage. Everything is lost on exit.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    bans: BTreeMap<BanKey, BanRecord>,
    ban_index: FastHashMap<UserId, BanKey>,
    next_seq: u64,
    servers: BTreeMap<ServerId, ServerRecord>,
    cooldowns: BTreeMap<ServerId, CooldownRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_all_bans(&self, limit: usize) -> StorageResult<Vec<BanRecord>> {
        let inner = self.inner.read();
        Ok(if limit > 0 {
            inner.bans.values().rev().take(limit).cloned().collect()
        } else {
            inner.bans.values().cloned().collect()
        })
    }

    fn get_bans_ascending(&self, offset: usize, limit: usize) -> StorageResult<Vec<BanRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .bans
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_ban(&self, user_id: UserId) -> StorageResult<Option<BanRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .ban_index
            .get(&user_id)
            .and_then(|key| inner.bans.get(key))
            .cloned())
    }

    fn get_ban_position(&self, user_id: UserId) -> StorageResult<Option<usize>> {
        let inner = self.inner.read();
        Ok(inner
            .ban_index
            .get(&user_id)
            .map(|key| inner.bans.range(..*key).count()))
    }

    fn get_num_bans(&self) -> StorageResult<usize> {
        Ok(self.inner.read().bans.len())
    }

    fn add_ban(
        &self,
        user_id: UserId,
        assigner_name: &str,
        assigner_id: UserId,
        evidence_thread: Option<u64>,
    ) -> StorageResult<BanAction> {
        let mut inner = self.inner.write();
        if inner.ban_index.contains_key(&user_id) {
            return Ok(BanAction::Duplicate);
        }

        let now = now_millis();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let key = (now, seq);
        inner.bans.insert(key, BanRecord {
            user_id,
            assigner_name: assigner_name.to_owned(),
            assigner_id,
            created_at: now,
            updated_at: now,
            evidence_thread,
            seq,
        });
        inner.ban_index.insert(user_id, key);
        Ok(BanAction::Banned)
    }

    fn remove_ban(&self, user_id: UserId) -> StorageResult<BanAction> {
        let mut inner = self.inner.write();
        match inner.ban_index.remove(&user_id) {
            Some(key) => {
                inner.bans.remove(&key);
                Ok(BanAction::Unbanned)
            }
            None => Ok(BanAction::NotExist),
        }
    }

    fn set_evidence_thread(&self, user_id: UserId, thread_id: u64) -> StorageResult<bool> {
        let mut inner = self.inner.write();
        let Some(key) = inner.ban_index.get(&user_id).copied() else {
            return Ok(false);
        };
        Ok(match inner.bans.get_mut(&key) {
            Some(ban) => {
                ban.evidence_thread = Some(thread_id);
                ban.updated_at = now_millis();
                true
            }
            None => false,
        })
    }

    fn get_server(&self, server_id: ServerId) -> StorageResult<Option<ServerRecord>> {
        Ok(self.inner.read().servers.get(&server_id).cloned())
    }

    fn get_all_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        Ok(self.inner.read().servers.values().cloned().collect())
    }

    fn put_server(&self, server: &ServerRecord) -> StorageResult<()> {
        self.inner
            .write()
            .servers
            .insert(server.server_id, server.clone());
        Ok(())
    }

    fn delete_server(&self, server_id: ServerId) -> StorageResult<bool> {
        Ok(self.inner.write().servers.remove(&server_id).is_some())
    }

    fn get_cooldown(&self, server_id: ServerId) -> StorageResult<Option<CooldownRecord>> {
        Ok(self.inner.read().cooldowns.get(&server_id).copied())
    }

    fn put_cooldown(&self, cooldown: &CooldownRecord) -> StorageResult<()> {
        self.inner
            .write()
            .cooldowns
            .insert(cooldown.server_id, *cooldown);
        Ok(())
    }

    fn delete_cooldown(&self, server_id: ServerId) -> StorageResult<bool> {
        Ok(self.inner.write().cooldowns.remove(&server_id).is_some())
    }

    fn get_exhausted_servers(&self) -> StorageResult<Vec<CooldownRecord>> {
        Ok(self.inner.read().cooldowns.values().copied().collect())
    }
}
