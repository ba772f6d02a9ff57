use anyhow::Result;
use bytesize::ByteSize;
use fleetguard_storage::*;

fn user_ids(bans: &[BanRecord]) -> Vec<UserId> {
    bans.iter().map(|ban| ban.user_id).collect()
}

fn server(server_id: ServerId, shard_id: ShardId, owner_id: UserId) -> NewServer {
    NewServer {
        server_id,
        shard_id,
        owner_id,
    }
}

fn check_ban_list(storage: &dyn Storage) -> Result<()> {
    for user_id in 1..=5 {
        assert_eq!(storage.add_ban(user_id, "alice", 100, None)?, BanAction::Banned);
    }
    assert_eq!(storage.add_ban(3, "bob", 101, None)?, BanAction::Duplicate);
    assert_eq!(storage.get_num_bans()?, 5);

    assert_eq!(user_ids(&storage.get_all_bans(0)?), [1, 2, 3, 4, 5]);
    assert_eq!(user_ids(&storage.get_all_bans(2)?), [5, 4]);
    assert_eq!(user_ids(&storage.get_all_bans(10)?), [5, 4, 3, 2, 1]);
    assert_eq!(user_ids(&storage.get_bans_ascending(1, 2)?), [2, 3]);
    assert_eq!(user_ids(&storage.get_bans_ascending(4, 10)?), [5]);
    assert!(storage.get_bans_ascending(5, 10)?.is_empty());

    assert_eq!(storage.get_ban_position(3)?, Some(2));
    assert_eq!(storage.remove_ban(2)?, BanAction::Unbanned);
    assert_eq!(storage.remove_ban(2)?, BanAction::NotExist);
    assert_eq!(storage.get_ban_position(3)?, Some(1));
    assert_eq!(storage.get_ban_position(2)?, None);
    assert_eq!(storage.get_num_bans()?, 4);

    let ban = storage.get_ban(4)?.unwrap();
    assert_eq!(ban.assigner_name, "alice");
    assert_eq!(ban.evidence_thread, None);
    assert!(storage.set_evidence_thread(4, 900)?);
    assert!(!storage.set_evidence_thread(2, 900)?);
    assert_eq!(storage.get_ban(4)?.unwrap().evidence_thread, Some(900));

    // re-banning appends to the end of the list
    assert_eq!(storage.add_ban(2, "carol", 102, Some(7))?, BanAction::Banned);
    assert_eq!(user_ids(&storage.get_all_bans(0)?), [1, 3, 4, 5, 2]);
    Ok(())
}

fn check_servers(storage: &dyn Storage) -> Result<()> {
    let added = storage.add_servers(&[server(10, 0, 1), server(11, 1, 2), server(12, 1, 3)])?;
    assert_eq!(added, 3);
    assert_eq!(storage.add_servers(&[server(10, 1, 9)])?, 0);
    assert_eq!(storage.get_bot_id_for_server(10)?, Some(0));
    assert_eq!(storage.get_num_servers()?, 3);
    assert!(!storage.is_activated(11)?);

    assert!(storage.set_activation(11, true, Some(2))?);
    assert!(storage.set_activation(12, true, Some(3))?);
    assert!(!storage.set_activation(99, true, None)?);
    assert_eq!(storage.get_num_activated_servers()?, 2);

    storage.set_server_settings(12, &ServerSettings {
        ban_enabled: false,
        message_channel: Some(555),
    })?;
    assert_eq!(storage.get_channel_id_for_server(12)?, Some(555));
    assert_eq!(storage.get_channel_id_for_server(11)?, None);

    let with_bans = storage.get_all_activated_servers_with_bans(1)?;
    assert_eq!(with_bans.len(), 1);
    assert_eq!(with_bans[0].server_id, 11);
    assert_eq!(with_bans[0].activator_id, Some(2));
    assert!(storage.get_all_activated_servers_with_bans(0)?.is_empty());

    let deactivated = storage.get_all_deactivated_servers()?;
    assert_eq!(deactivated.len(), 1);
    assert_eq!(deactivated[0].server_id, 10);

    assert!(storage.set_new_owner(11, 42)?);
    assert_eq!(storage.get_server(11)?.unwrap().owner_id, 42);
    assert_eq!(storage.get_servers_of_owner(42)?.len(), 1);

    // shard 1 is now live in 12 and 13 and still sees the control server 20
    storage.add_servers(&[server(20, 1, 5)])?;
    let summary = storage.reconcile_servers(1, &[(12, 3), (13, 4)], Some(20))?;
    assert_eq!(summary, ReconcileSummary {
        added: 1,
        removed: 1,
    });
    assert!(!storage.is_in_server(11)?);
    assert!(storage.is_in_server(13)?);
    assert!(storage.is_in_server(20)?);
    assert!(storage.is_in_server(10)?);
    assert!(!storage.is_activated(13)?);

    assert!(storage.remove_server(13)?);
    assert!(!storage.remove_server(13)?);
    Ok(())
}

fn check_cooldowns(storage: &dyn Storage) -> Result<()> {
    assert!(!storage.is_server_in_cooldown(10)?);
    assert!(storage.add_server_cooldown(10, 39)?);
    assert!(!storage.add_server_cooldown(10, 50)?);
    assert_eq!(storage.get_cooldown(10)?.unwrap().current_position, 39);

    assert!(storage.add_server_cooldown(11, 0)?);
    assert!(storage.set_processing_server_cooldown(10, true)?);
    assert!(storage.set_processing_server_cooldown(11, true)?);
    assert!(!storage.set_processing_server_cooldown(12, true)?);

    storage.update_server_cooldown(10, 70)?;
    let cooldown = storage.get_cooldown(10)?.unwrap();
    assert_eq!(cooldown.current_position, 70);
    assert!(!cooldown.processing);

    assert_eq!(storage.clear_cooldown_processing_flags()?, 1);
    assert!(storage.get_exhausted_servers()?.iter().all(|c| !c.processing));

    let servers = storage
        .get_exhausted_servers()?
        .iter()
        .map(|c| c.server_id)
        .collect::<Vec<_>>();
    assert_eq!(servers, [10, 11]);

    assert!(storage.remove_server_cooldown(10)?);
    assert!(!storage.remove_server_cooldown(10)?);
    assert!(!storage.is_server_in_cooldown(10)?);
    Ok(())
}

#[test]
fn memory_storage() -> Result<()> {
    fleetguard_util::test::init_logger("memory_storage", "debug");

    let storage = MemoryStorage::new();
    check_ban_list(&storage)?;
    check_servers(&storage)?;
    check_cooldowns(&storage)?;

    let dir = tempfile::tempdir()?;
    assert_eq!(storage.backup(dir.path())?, None);
    Ok(())
}

#[test]
fn persistent_storage() -> Result<()> {
    fleetguard_util::test::init_logger("persistent_storage", "debug");

    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("db");

    {
        let storage = PersistentStorage::open(&db_path, ByteSize::mib(8))?;
        check_ban_list(&storage)?;
        check_servers(&storage)?;
        check_cooldowns(&storage)?;

        let backup = storage.backup(&dir.path().join("backups"))?.unwrap();
        assert!(backup.join("CURRENT").exists());
    }

    // everything survives a reopen, including the insertion order
    let storage = PersistentStorage::open(&db_path, ByteSize::mib(8))?;
    assert_eq!(user_ids(&storage.get_all_bans(0)?), [1, 3, 4, 5, 2]);
    assert_eq!(storage.add_ban(6, "dave", 103, None)?, BanAction::Banned);
    assert_eq!(storage.get_ban(6)?.unwrap().seq, 6);
    assert_eq!(storage.get_ban_position(6)?, Some(5));
    assert!(storage.is_in_server(12)?);
    assert!(storage.is_server_in_cooldown(11)?);
    Ok(())
}

#[test]
fn config_selects_backend() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let memory = StorageConfig::default().open()?;
    assert_eq!(memory.get_num_bans()?, 0);

    let config: StorageConfig = serde_json::from_value(serde_json::json!({
        "path": dir.path().join("db"),
        "rocksdb_lru_capacity": "16 MiB",
    }))?;
    let persistent = config.open()?;
    persistent.add_ban(1, "alice", 100, None)?;
    assert_eq!(persistent.get_num_bans()?, 1);
    Ok(())
}
