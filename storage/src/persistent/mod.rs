use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use fleetguard_util::time::{now_millis, now_sec};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use weedb::rocksdb::checkpoint::Checkpoint;
use weedb::rocksdb::{LogLevel, WriteBatch};
use weedb::{Caches, ColumnFamily, WeeDb, WeeDbBuilder};

use crate::error::{StorageError, StorageResult};
use crate::models::*;
use crate::traits::Storage;

pub mod tables;

pub type FleetDb = WeeDb<FleetTables>;

weedb::tables! {
    pub struct FleetTables<Caches> {
        pub state: tables::State,
        pub bans: tables::Bans,
        pub ban_index: tables::BanIndex,
        pub servers: tables::Servers,
        pub cooldowns: tables::Cooldowns,
    }
}

/// RocksDB-backed storage.
pub struct PersistentStorage {
    db: FleetDb,
    /// Serializes ban list writes. Holds the next insertion sequence number.
    ban_lock: Mutex<u64>,
}

impl PersistentStorage {
    pub const DB_NAME: &'static str = "fleetguard";

    pub fn open<P: AsRef<Path>>(path: P, lru_capacity: ByteSize) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        tracing::debug!(path = %path.display(), "opening RocksDB instance");

        let caches = Caches::with_capacity(lru_capacity.as_u64() as usize);
        let db: FleetDb = WeeDbBuilder::new(path, caches)
            .with_name(Self::DB_NAME)
            .with_options(|opts, _| {
                opts.set_paranoid_checks(false);
                opts.set_log_level(LogLevel::Warn);
                opts.set_keep_log_file_num(2);
                opts.create_if_missing(true);
                opts.create_missing_column_families(true);
            })
            .build()
            .map_err(|e| StorageError::Open(e.to_string()))?;

        let next_seq = match db.state.get(tables::State::BAN_SEQ)? {
            Some(value) => decode_u64(value.as_ref(), tables::State::NAME)?,
            None => 0,
        };

        Ok(Self {
            db,
            ban_lock: Mutex::new(next_seq),
        })
    }

    fn ban_key(&self, user_id: UserId) -> StorageResult<Option<[u8; tables::Bans::KEY_LEN]>> {
        match self.db.ban_index.get(user_id.to_be_bytes())? {
            Some(key) => key
                .as_ref()
                .try_into()
                .map(Some)
                .map_err(|_| StorageError::Corrupted {
                    table: tables::BanIndex::NAME,
                }),
            None => Ok(None),
        }
    }
}

impl Storage for PersistentStorage {
    fn get_all_bans(&self, limit: usize) -> StorageResult<Vec<BanRecord>> {
        let mut iter = self.db.bans.raw_iterator();
        let mut bans = Vec::new();
        if limit > 0 {
            iter.seek_to_last();
            while bans.len() < limit {
                let Some(value) = iter.value() else {
                    break;
                };
                bans.push(read_json(value)?);
                iter.prev();
            }
        } else {
            iter.seek_to_first();
            while let Some(value) = iter.value() {
                bans.push(read_json(value)?);
                iter.next();
            }
        }
        iter.status()?;
        Ok(bans)
    }

    fn get_bans_ascending(&self, offset: usize, limit: usize) -> StorageResult<Vec<BanRecord>> {
        let mut iter = self.db.bans.raw_iterator();
        iter.seek_to_first();

        let mut skipped = 0;
        while skipped < offset && iter.valid() {
            iter.next();
            skipped += 1;
        }

        let mut bans = Vec::new();
        while bans.len() < limit {
            let Some(value) = iter.value() else {
                break;
            };
            bans.push(read_json(value)?);
            iter.next();
        }
        iter.status()?;
        Ok(bans)
    }

    fn get_ban(&self, user_id: UserId) -> StorageResult<Option<BanRecord>> {
        let Some(key) = self.ban_key(user_id)? else {
            return Ok(None);
        };
        match self.db.bans.get(key)? {
            Some(value) => read_json(value.as_ref()).map(Some),
            None => Err(StorageError::Corrupted {
                table: tables::BanIndex::NAME,
            }),
        }
    }

    fn get_ban_position(&self, user_id: UserId) -> StorageResult<Option<usize>> {
        let Some(target) = self.ban_key(user_id)? else {
            return Ok(None);
        };

        let mut iter = self.db.bans.raw_iterator();
        iter.seek_to_first();

        let mut position = 0;
        while let Some(key) = iter.key() {
            if key == target.as_slice() {
                return Ok(Some(position));
            }
            position += 1;
            iter.next();
        }
        iter.status()?;

        Err(StorageError::Corrupted {
            table: tables::BanIndex::NAME,
        })
    }

    fn get_num_bans(&self) -> StorageResult<usize> {
        let mut iter = self.db.bans.raw_iterator();
        iter.seek_to_first();

        let mut count = 0;
        while iter.valid() {
            count += 1;
            iter.next();
        }
        iter.status()?;
        Ok(count)
    }

    fn add_ban(
        &self,
        user_id: UserId,
        assigner_name: &str,
        assigner_id: UserId,
        evidence_thread: Option<u64>,
    ) -> StorageResult<BanAction> {
        let mut next_seq = self.ban_lock.lock();
        if self.ban_key(user_id)?.is_some() {
            return Ok(BanAction::Duplicate);
        }

        let now = now_millis();
        let seq = *next_seq;
        let record = BanRecord {
            user_id,
            assigner_name: assigner_name.to_owned(),
            assigner_id,
            created_at: now,
            updated_at: now,
            evidence_thread,
            seq,
        };
        let key = tables::Bans::make_key(now, seq);

        let bans_cf = self.db.bans.get_unbounded_cf();
        let index_cf = self.db.ban_index.get_unbounded_cf();
        let state_cf = self.db.state.get_unbounded_cf();

        let mut batch = WriteBatch::default();
        batch.put_cf(&bans_cf.bound(), key, serde_json::to_vec(&record)?);
        batch.put_cf(&index_cf.bound(), user_id.to_be_bytes(), key);
        batch.put_cf(
            &state_cf.bound(),
            tables::State::BAN_SEQ,
            (seq + 1).to_be_bytes(),
        );
        self.db.rocksdb().write(batch)?;

        *next_seq = seq + 1;
        Ok(BanAction::Banned)
    }

    fn remove_ban(&self, user_id: UserId) -> StorageResult<BanAction> {
        let _guard = self.ban_lock.lock();
        let Some(key) = self.ban_key(user_id)? else {
            return Ok(BanAction::NotExist);
        };

        let bans_cf = self.db.bans.get_unbounded_cf();
        let index_cf = self.db.ban_index.get_unbounded_cf();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&bans_cf.bound(), key);
        batch.delete_cf(&index_cf.bound(), user_id.to_be_bytes());
        self.db.rocksdb().write(batch)?;

        Ok(BanAction::Unbanned)
    }

    fn set_evidence_thread(&self, user_id: UserId, thread_id: u64) -> StorageResult<bool> {
        let _guard = self.ban_lock.lock();
        let Some(key) = self.ban_key(user_id)? else {
            return Ok(false);
        };
        let Some(value) = self.db.bans.get(key)? else {
            return Ok(false);
        };

        let mut record: BanRecord = read_json(value.as_ref())?;
        record.evidence_thread = Some(thread_id);
        record.updated_at = now_millis();
        self.db.bans.insert(key, serde_json::to_vec(&record)?)?;
        Ok(true)
    }

    fn get_server(&self, server_id: ServerId) -> StorageResult<Option<ServerRecord>> {
        match self.db.servers.get(server_id.to_be_bytes())? {
            Some(value) => read_json(value.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    fn get_all_servers(&self) -> StorageResult<Vec<ServerRecord>> {
        let mut iter = self.db.servers.raw_iterator();
        iter.seek_to_first();

        let mut servers = Vec::new();
        while let Some(value) = iter.value() {
            servers.push(read_json(value)?);
            iter.next();
        }
        iter.status()?;
        Ok(servers)
    }

    fn put_server(&self, server: &ServerRecord) -> StorageResult<()> {
        self.db
            .servers
            .insert(server.server_id.to_be_bytes(), serde_json::to_vec(server)?)?;
        Ok(())
    }

    fn delete_server(&self, server_id: ServerId) -> StorageResult<bool> {
        let key = server_id.to_be_bytes();
        if self.db.servers.get(key)?.is_none() {
            return Ok(false);
        }
        self.db.servers.remove(key)?;
        Ok(true)
    }

    fn get_cooldown(&self, server_id: ServerId) -> StorageResult<Option<CooldownRecord>> {
        match self.db.cooldowns.get(server_id.to_be_bytes())? {
            Some(value) => read_json(value.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    fn put_cooldown(&self, cooldown: &CooldownRecord) -> StorageResult<()> {
        self.db.cooldowns.insert(
            cooldown.server_id.to_be_bytes(),
            serde_json::to_vec(cooldown)?,
        )?;
        Ok(())
    }

    fn delete_cooldown(&self, server_id: ServerId) -> StorageResult<bool> {
        let key = server_id.to_be_bytes();
        if self.db.cooldowns.get(key)?.is_none() {
            return Ok(false);
        }
        self.db.cooldowns.remove(key)?;
        Ok(true)
    }

    fn get_exhausted_servers(&self) -> StorageResult<Vec<CooldownRecord>> {
        let mut iter = self.db.cooldowns.raw_iterator();
        iter.seek_to_first();

        let mut cooldowns = Vec::new();
        while let Some(value) = iter.value() {
            cooldowns.push(read_json(value)?);
            iter.next();
        }
        iter.status()?;
        Ok(cooldowns)
    }

    fn backup(&self, dir: &Path) -> StorageResult<Option<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let target = dir.join(format!("{}-{}", Self::DB_NAME, now_sec()));

        let raw: &weedb::rocksdb::DB = self.db.rocksdb();
        Checkpoint::new(raw)?.create_checkpoint(&target)?;

        tracing::info!(path = %target.display(), "storage backed up");
        Ok(Some(target))
    }
}

fn read_json<T: DeserializeOwned>(value: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(value).map_err(StorageError::from)
}

fn decode_u64(value: &[u8], table: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map(u64::from_be_bytes)
        .map_err(|_| StorageError::Corrupted { table })
}
