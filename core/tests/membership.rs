use anyhow::Result;
use fleetguard_core::platform::{MemberPermissions, PlatformCall, PlatformEvent};
use fleetguard_storage::{NewServer, ReconcileSummary};

use self::common::*;

mod common;

const ADMIN: u64 = 7;

#[tokio::test]
async fn initialize_reconciles_membership() -> Result<()> {
    fleetguard_util::test::init_logger("initialize_reconciles_membership", "debug");

    let mut config = test_config();
    config.control_server = Some(500);
    let shard = Shard::new(0, config, memory_storage());

    shard.platform.add_server(server_info(101, 3));
    shard.platform.add_server(server_info(102, 4));
    shard.storage().add_servers(&[
        NewServer {
            server_id: 101,
            shard_id: 0,
            owner_id: 3,
        },
        NewServer {
            server_id: 500,
            shard_id: 0,
            owner_id: 9,
        },
        NewServer {
            server_id: 999,
            shard_id: 0,
            owner_id: 9,
        },
        NewServer {
            server_id: 888,
            shard_id: 1,
            owner_id: 9,
        },
    ])?;

    let summary = shard.bot.initialize()?;
    assert_eq!(summary, ReconcileSummary {
        added: 1,
        removed: 1,
    });

    let storage = shard.storage();
    assert!(storage.is_in_server(102)?);
    assert!(!storage.is_activated(102)?);
    assert!(storage.is_in_server(500)?);
    assert!(!storage.is_in_server(999)?);
    assert!(storage.is_in_server(888)?);
    Ok(())
}

#[tokio::test]
async fn joining_a_tracked_server_leaves_it() -> Result<()> {
    fleetguard_util::test::init_logger("joining_a_tracked_server_leaves_it", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    shard.storage().add_servers(&[NewServer {
        server_id: 101,
        shard_id: 2,
        owner_id: 3,
    }])?;

    shard.platform.join_server(server_info(101, 3));
    shard.platform.join_server(server_info(102, 4));
    let mut events = shard.platform.take_events().unwrap();
    for _ in 0..2 {
        let event = events.recv().await.unwrap();
        shard.bot.handle_platform_event(&event).await?;
    }

    assert!(shard.platform.calls().contains(&PlatformCall::LeaveServer { server_id: 101 }));
    assert_eq!(shard.storage().get_bot_id_for_server(101)?, Some(2));

    let joined = shard.storage().get_server(102)?.unwrap();
    assert_eq!(joined.shard_id, 1);
    assert_eq!(joined.owner_id, 4);
    assert!(!joined.activated);

    // The leave above is reported back but the record belongs to another shard
    let event = events.recv().await.unwrap();
    assert!(matches!(event, PlatformEvent::ServerRemoved(ref info) if info.id == 101));
    shard.bot.handle_platform_event(&event).await?;
    assert!(shard.storage().is_in_server(101)?);
    Ok(())
}

#[tokio::test]
async fn removals_and_updates_touch_only_own_servers() -> Result<()> {
    fleetguard_util::test::init_logger("removals_and_updates_touch_only_own_servers", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    shard.add_activated_server(101, 3)?;
    shard.storage().add_servers(&[NewServer {
        server_id: 201,
        shard_id: 2,
        owner_id: 4,
    }])?;
    shard.storage().add_server_cooldown(101, 3)?;

    assert!(shard.platform.transfer_ownership(101, 30));
    assert!(shard.bot.on_server_updated(&server_info(101, 3), &server_info(101, 30))?);
    assert_eq!(shard.storage().get_server(101)?.unwrap().owner_id, 30);

    assert!(!shard.bot.on_server_updated(&server_info(201, 4), &server_info(201, 40))?);
    assert_eq!(shard.storage().get_server(201)?.unwrap().owner_id, 4);

    assert!(!shard.bot.on_server_removed(201)?);
    assert!(shard.storage().is_in_server(201)?);

    assert!(shard.bot.on_server_removed(101)?);
    assert!(!shard.storage().is_in_server(101)?);
    assert!(!shard.storage().is_server_in_cooldown(101)?);
    Ok(())
}

#[tokio::test]
async fn leaving_is_routed_to_the_owner() -> Result<()> {
    fleetguard_util::test::init_logger("leaving_is_routed_to_the_owner", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    shard.add_activated_server(101, 3)?;
    shard.storage().add_servers(&[NewServer {
        server_id: 201,
        shard_id: 2,
        owner_id: 4,
    }])?;

    // Unknown server
    assert!(!shard.bot.leave_server(999)?);
    // Owned by another shard but there is no relay connection
    assert!(!shard.bot.leave_server(201)?);

    assert!(shard.bot.leave_server(101)?);
    shard.settle().await;
    assert!(shard.platform.calls().contains(&PlatformCall::LeaveServer { server_id: 101 }));
    assert!(!shard.storage().is_in_server(101)?);

    // Servers unknown to the session are never left
    assert!(!shard.bot.force_leave_server(201).await?);
    Ok(())
}

#[tokio::test]
async fn activation_follows_elevated_permissions() -> Result<()> {
    fleetguard_util::test::init_logger("activation_follows_elevated_permissions", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    let users = add_bans(shard.storage().as_ref(), 3)?;

    // Admin member, owner and a plain member
    for (server_id, owner_id) in [(101, 3), (102, ADMIN), (103, 5)] {
        shard.platform.add_server(server_info(server_id, owner_id));
    }
    shard.platform.add_member(101, ADMIN, MemberPermissions {
        administrator: true,
        ..Default::default()
    });
    shard.platform.add_member(103, ADMIN, MemberPermissions {
        ban_members: true,
        ..Default::default()
    });
    shard.bot.initialize()?;

    let activated = shard.bot.activate_servers_with_permissions(ADMIN).await?;
    assert_eq!(activated, 2);
    shard.settle().await;

    let storage = shard.storage();
    assert!(storage.is_activated(101)?);
    assert!(storage.is_activated(102)?);
    assert!(!storage.is_activated(103)?);
    assert_eq!(storage.get_server(101)?.unwrap().activator_id, Some(ADMIN));

    // Activation imports the whole ban list
    assert_eq!(ban_calls(&shard.platform, 101), users);
    assert_eq!(ban_calls(&shard.platform, 102), users);

    // Already activated servers are skipped
    assert_eq!(shard.bot.activate_servers_with_permissions(ADMIN).await?, 0);

    assert_eq!(shard.bot.deactivate_servers_with_permissions(ADMIN).await?, 2);
    assert!(!storage.is_activated(101)?);
    assert!(!storage.is_activated(102)?);
    Ok(())
}

#[tokio::test]
async fn activation_creates_missing_records() -> Result<()> {
    fleetguard_util::test::init_logger("activation_creates_missing_records", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    shard.platform.add_server(server_info(101, ADMIN));

    assert_eq!(shard.bot.activate_servers_with_permissions(ADMIN).await?, 1);
    let record = shard.storage().get_server(101)?.unwrap();
    assert_eq!(record.shard_id, 1);
    assert!(record.activated);
    Ok(())
}

#[tokio::test]
async fn single_server_activation_checks_the_owner_shard() -> Result<()> {
    fleetguard_util::test::init_logger("single_server_activation_checks_the_owner_shard", "debug");

    let shard = Shard::new(1, test_config(), memory_storage());
    let users = add_bans(shard.storage().as_ref(), 2)?;
    shard.add_inactive_server(101, 3)?;
    shard.storage().add_servers(&[NewServer {
        server_id: 201,
        shard_id: 2,
        owner_id: 4,
    }])?;

    assert!(!shard.bot.activate_server_instance(ADMIN, 201)?);
    assert!(!shard.storage().is_activated(201)?);

    assert!(shard.bot.activate_server_instance(ADMIN, 101)?);
    shard.settle().await;
    assert!(shard.storage().is_activated(101)?);
    assert_eq!(ban_calls(&shard.platform, 101), users);
    Ok(())
}
