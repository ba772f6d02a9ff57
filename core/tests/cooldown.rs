use anyhow::Result;
use fleetguard_core::platform::PlatformError;
use fleetguard_core::{BanResult, FleetConfig};
use fleetguard_relay::RelayAddress;
use fleetguard_storage::NewServer;

use self::common::*;

mod common;

fn relay_config(dir: &tempfile::TempDir) -> FleetConfig {
    let mut config = test_config();
    config.relay.address = Some(RelayAddress::Unix(dir.path().join("relay.sock")));
    config
}

#[tokio::test]
async fn exhausted_replay_resumes_from_the_failed_ban() -> Result<()> {
    fleetguard_util::test::init_logger("exhausted_replay_resumes_from_the_failed_ban", "debug");

    let dir = tempfile::tempdir()?;
    let shard = Shard::new(0, relay_config(&dir), memory_storage());
    let control = control(&shard)?;
    control.bind_relay().await?;

    let users = add_bans(shard.storage().as_ref(), 100)?;
    shard.add_activated_server(105, 3)?;
    shard.platform.set_ban_quota(105, 40);

    let result = shard.bot.reprocess_bans(105, 0, false).await?;
    assert_eq!(result, BanResult::BansExceeded);
    shard.settle().await;

    // 40 bans applied, the 41st hit the quota
    assert_eq!(ban_calls(&shard.platform, 105), users[..41]);
    let cooldown = shard.storage().get_cooldown(105)?.unwrap();
    assert_eq!(cooldown.current_position, 39);
    assert!(!cooldown.processing);

    // The sweep waits for the worker shards
    assert_eq!(control.handle_ban_exceed()?, 0);
    assert!(!shard.storage().get_cooldown(105)?.unwrap().processing);

    assert!(control.start_all_instances(false)?);
    shard.platform.set_ban_quota(105, 1000);
    shard.platform.clear_calls();

    assert_eq!(control.handle_ban_exceed()?, 1);
    assert!(shard.storage().get_cooldown(105)?.unwrap().processing);

    // A queued pass is never queued twice
    assert_eq!(control.handle_ban_exceed()?, 0);

    shard.settle().await;
    assert_eq!(ban_calls(&shard.platform, 105), users[39..]);
    assert!(shard.storage().get_cooldown(105)?.is_none());
    Ok(())
}

#[tokio::test]
async fn repeated_exhaustion_moves_the_position_forward() -> Result<()> {
    fleetguard_util::test::init_logger("repeated_exhaustion_moves_the_position_forward", "debug");

    let shard = Shard::new(0, test_config(), memory_storage());
    let users = add_bans(shard.storage().as_ref(), 100)?;
    shard.add_activated_server(105, 3)?;
    shard.storage().update_server_cooldown(105, 39)?;
    shard.storage().set_processing_server_cooldown(105, true)?;
    shard.platform.set_ban_quota(105, 10);

    let result = shard.bot.reprocess_bans(105, 61, true).await?;
    assert_eq!(result, BanResult::BansExceeded);
    shard.settle().await;

    assert_eq!(ban_calls(&shard.platform, 105), users[39..50]);
    let cooldown = shard.storage().get_cooldown(105)?.unwrap();
    assert_eq!(cooldown.current_position, 48);
    assert!(!cooldown.processing);
    Ok(())
}

#[tokio::test]
async fn sweep_drops_cooldowns_without_work() -> Result<()> {
    fleetguard_util::test::init_logger("sweep_drops_cooldowns_without_work", "debug");

    let dir = tempfile::tempdir()?;
    let shard = Shard::new(0, relay_config(&dir), memory_storage());
    let control = control(&shard)?;
    control.bind_relay().await?;
    control.start_all_instances(false)?;

    add_bans(shard.storage().as_ref(), 10)?;
    shard.add_activated_server(101, 3)?;

    // Unknown owner
    shard.storage().add_server_cooldown(999, 5)?;
    // Nothing left to replay
    shard.storage().add_server_cooldown(101, 10)?;

    assert_eq!(control.handle_ban_exceed()?, 0);
    assert!(shard.storage().get_exhausted_servers()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn lost_permissions_keep_an_existing_cooldown() -> Result<()> {
    fleetguard_util::test::init_logger("lost_permissions_keep_an_existing_cooldown", "debug");

    let shard = Shard::new(0, test_config(), memory_storage());
    add_bans(shard.storage().as_ref(), 20)?;
    shard.add_activated_server(101, 3)?;
    shard.add_activated_server(102, 4)?;

    shard.storage().update_server_cooldown(101, 9)?;
    shard.storage().set_processing_server_cooldown(101, true)?;

    for server_id in [101, 102] {
        shard.platform.set_ban_quota(server_id, 5);
        shard.platform.fail_next(server_id, PlatformError::Forbidden);
    }

    let result = shard.bot.reprocess_bans(101, 10, true).await?;
    assert_eq!(result, BanResult::LostPermissions);
    let cooldown = shard.storage().get_cooldown(101)?.unwrap();
    assert_eq!(cooldown.current_position, 9);
    assert!(!cooldown.processing);

    // Servers outside cooldown do not get one
    let result = shard.bot.reprocess_bans(102, 0, false).await?;
    assert_eq!(result, BanResult::LostPermissions);
    assert!(shard.storage().get_cooldown(102)?.is_none());

    shard.settle().await;
    assert_eq!(ban_calls(&shard.platform, 102).len(), 1);
    Ok(())
}

#[tokio::test]
async fn too_many_failures_stop_the_pass() -> Result<()> {
    fleetguard_util::test::init_logger("too_many_failures_stop_the_pass", "debug");

    let mut config = test_config();
    config.max_ban_failures = 2;
    config.notification_channel = Some(55);

    let shard = Shard::new(0, config, memory_storage());
    add_bans(shard.storage().as_ref(), 10)?;
    shard.add_activated_server(101, 3)?;
    for _ in 0..5 {
        shard.platform.fail_next(101, PlatformError::Http {
            status: 400,
            code: 0,
        });
    }

    let result = shard.bot.reprocess_bans(101, 0, false).await?;
    assert_eq!(result, BanResult::Error);
    shard.settle().await;

    assert_eq!(ban_calls(&shard.platform, 101).len(), 3);
    assert!(shard.storage().get_cooldown(101)?.is_none());

    let messages = shard.platform.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, 55);
    assert_eq!(messages[0].1.title, "Shard #0");
    Ok(())
}

#[tokio::test]
async fn bulk_import_limit_defers_the_rest() -> Result<()> {
    fleetguard_util::test::init_logger("bulk_import_limit_defers_the_rest", "debug");

    let mut config = test_config();
    config.max_bulk_imports = 5;

    let shard = Shard::new(0, config, memory_storage());
    let users = add_bans(shard.storage().as_ref(), 8)?;
    shard.add_activated_server(101, 3)?;

    let result = shard.bot.reprocess_bans(101, 0, false).await?;
    assert_eq!(result, BanResult::BansExceeded);
    shard.settle().await;

    assert_eq!(ban_calls(&shard.platform, 101), users[..5]);
    assert_eq!(shard.storage().get_cooldown(101)?.unwrap().current_position, 4);
    assert!(shard.platform.messages().is_empty());
    Ok(())
}

#[tokio::test]
async fn replays_are_throttled() -> Result<()> {
    fleetguard_util::test::init_logger("replays_are_throttled", "debug");

    let mut config = test_config();
    config.throttle.actions_per_tick = 7;

    let shard = Shard::new(0, config, memory_storage());
    add_bans(shard.storage().as_ref(), 50)?;
    shard.add_activated_server(101, 3)?;

    let result = shard.bot.reprocess_bans(101, 0, false).await?;
    assert_eq!(result, BanResult::Processed);
    assert_eq!(ban_calls(&shard.platform, 101).len(), 50);
    assert_eq!(shard.sleeper.count(), 50 / 7);
    Ok(())
}

#[tokio::test]
async fn partial_replays_take_the_newest_bans() -> Result<()> {
    fleetguard_util::test::init_logger("partial_replays_take_the_newest_bans", "debug");

    let shard = Shard::new(0, test_config(), memory_storage());
    let users = add_bans(shard.storage().as_ref(), 10)?;
    shard.add_activated_server(101, 3)?;
    shard.add_activated_server(102, 4)?;

    let result = shard.bot.reprocess_bans(101, 3, false).await?;
    assert_eq!(result, BanResult::Processed);
    assert_eq!(ban_calls(&shard.platform, 101), users[7..]);

    shard.platform.clear_calls();
    shard.bot.reprocess_instance(2).await?;
    for server_id in [101, 102] {
        assert_eq!(ban_calls(&shard.platform, server_id), users[8..]);
    }

    // Unknown servers report an error
    assert_eq!(shard.bot.reprocess_bans(999, 0, false).await?, BanResult::Error);
    Ok(())
}

#[tokio::test]
async fn failed_sweep_releases_the_cooldown() -> Result<()> {
    fleetguard_util::test::init_logger("failed_sweep_releases_the_cooldown", "debug");

    let dir = tempfile::tempdir()?;
    let shard = Shard::new(0, relay_config(&dir), memory_storage());
    let control = control(&shard)?;
    control.bind_relay().await?;
    assert!(control.start_all_instances(false)?);

    add_bans(shard.storage().as_ref(), 10)?;
    shard.storage().add_servers(&[NewServer {
        server_id: 201,
        shard_id: 1,
        owner_id: 4,
    }])?;
    shard.storage().add_server_cooldown(201, 6)?;

    // Routing to the owner shard fails without a relay connection
    shard.bot.set_relay(None);
    assert_eq!(control.handle_ban_exceed()?, 1);
    shard.settle().await;

    let cooldown = shard.storage().get_cooldown(201)?.unwrap();
    assert!(!cooldown.processing);
    assert_eq!(cooldown.current_position, 6);

    assert_eq!(control.handle_ban_exceed()?, 1);
    shard.settle().await;
    assert!(!shard.storage().get_cooldown(201)?.unwrap().processing);
    Ok(())
}

#[tokio::test]
async fn failure_limit_on_the_last_ban_keeps_the_cooldown() -> Result<()> {
    fleetguard_util::test::init_logger("failure_limit_on_the_last_ban_keeps_the_cooldown", "debug");

    let mut config = test_config();
    config.max_ban_failures = 1;

    let shard = Shard::new(0, config, memory_storage());
    add_bans(shard.storage().as_ref(), 2)?;
    shard.add_activated_server(101, 3)?;
    shard.storage().add_server_cooldown(101, 0)?;
    for _ in 0..2 {
        shard.platform.fail_next(101, PlatformError::Http {
            status: 400,
            code: 0,
        });
    }

    let result = shard.bot.reprocess_bans(101, 2, true).await?;
    assert_eq!(result, BanResult::Error);
    shard.settle().await;

    assert_eq!(ban_calls(&shard.platform, 101).len(), 2);
    let cooldown = shard.storage().get_cooldown(101)?.unwrap();
    assert_eq!(cooldown.current_position, 0);
    assert!(!cooldown.processing);
    Ok(())
}
