use weedb::rocksdb::{BlockBasedOptions, DataBlockIndexType, Options};
use weedb::{Caches, ColumnFamily, ColumnFamilyOptions};

/// Stores storage-wide counters
/// - Key: `...`
/// - Value: `u64 (BE)`
pub struct State;

impl State {
    pub const BAN_SEQ: &'static [u8] = b"ban_seq";
}

impl ColumnFamily for State {
    const NAME: &'static str = "state";
}

impl ColumnFamilyOptions<Caches> for State {
    fn options(opts: &mut Options, caches: &mut Caches) {
        optimize_for_point_lookup(opts, caches);
    }
}

/// Ban list in creation order
/// - Key: `created_at: u64 (BE), seq: u64 (BE)`
/// - Value: `BanRecord` (json)
pub struct Bans;

impl Bans {
    pub const KEY_LEN: usize = 8 + 8;

    pub fn make_key(created_at: u64, seq: u64) -> [u8; Self::KEY_LEN] {
        let mut key = [0; Self::KEY_LEN];
        key[..8].copy_from_slice(&created_at.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        key
    }
}

impl ColumnFamily for Bans {
    const NAME: &'static str = "bans";
}

impl ColumnFamilyOptions<Caches> for Bans {
    fn options(opts: &mut Options, caches: &mut Caches) {
        default_block_based_table_factory(opts, caches);
    }
}

/// Maps banned user to the key in [`Bans`]
/// - Key: `user_id: u64 (BE)`
/// - Value: `created_at: u64 (BE), seq: u64 (BE)`
pub struct BanIndex;

impl ColumnFamily for BanIndex {
    const NAME: &'static str = "ban_index";
}

impl ColumnFamilyOptions<Caches> for BanIndex {
    fn options(opts: &mut Options, caches: &mut Caches) {
        optimize_for_point_lookup(opts, caches);
    }
}

/// Server assignments
/// - Key: `server_id: u64 (BE)`
/// - Value: `ServerRecord` (json)
pub struct Servers;

impl ColumnFamily for Servers {
    const NAME: &'static str = "servers";
}

impl ColumnFamilyOptions<Caches> for Servers {
    fn options(opts: &mut Options, caches: &mut Caches) {
        default_block_based_table_factory(opts, caches);
    }
}

/// Servers which hit the moderation quota
/// - Key: `server_id: u64 (BE)`
/// - Value: `CooldownRecord` (json)
pub struct Cooldowns;

impl ColumnFamily for Cooldowns {
    const NAME: &'static str = "cooldowns";
}

impl ColumnFamilyOptions<Caches> for Cooldowns {}

fn default_block_based_table_factory(opts: &mut Options, caches: &Caches) {
    opts.set_level_compaction_dynamic_level_bytes(true);
    let mut block_factory = BlockBasedOptions::default();
    block_factory.set_block_cache(&caches.block_cache);
    block_factory.set_format_version(6);
    opts.set_block_based_table_factory(&block_factory);
}

fn optimize_for_point_lookup(opts: &mut Options, caches: &Caches) {
    let mut block_factory = BlockBasedOptions::default();
    block_factory.set_data_block_index_type(DataBlockIndexType::BinaryAndHash);
    block_factory.set_data_block_hash_ratio(0.75);
    block_factory.set_bloom_filter(10.0, false);
    block_factory.set_block_cache(&caches.block_cache);
    opts.set_block_based_table_factory(&block_factory);

    opts.set_memtable_prefix_bloom_ratio(0.02);
    opts.set_memtable_whole_key_filtering(true);
}
