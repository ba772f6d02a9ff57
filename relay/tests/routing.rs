use std::sync::{Arc, Mutex};

use anyhow::Result;
use fleetguard_relay::message::{BanUser, LeaveServer, Ping, ReprocessBans};
use fleetguard_relay::{DEFAULT_MAX_FRAME_LENGTH, RelayAddress, RelayClient, RelayServer};

mod common;

async fn connect(address: &RelayAddress, shard_id: i32) -> Result<RelayClient> {
    let mut client = RelayClient::connect(address, shard_id, 0, DEFAULT_MAX_FRAME_LENGTH).await?;
    assert!(client.send_hello());
    Ok(client)
}

#[tokio::test]
async fn control_commands_reach_workers() -> Result<()> {
    fleetguard_util::test::init_logger("control_commands_reach_workers", "debug");

    let dir = tempfile::tempdir()?;
    let address = RelayAddress::Unix(dir.path().join("relay.sock"));
    let mut server = RelayServer::bind(&address, 0, DEFAULT_MAX_FRAME_LENGTH).await?;

    let mut control = connect(&address, 0).await?;
    let mut worker1 = connect(&address, 1).await?;
    let mut worker2 = connect(&address, 2).await?;

    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    for worker in [&mut worker1, &mut worker2] {
        let shard = worker.shard_id();
        worker.register({
            let log = log.clone();
            move |req: BanUser| {
                log.lock().unwrap().push(format!("{shard}: ban {}", req.target_user));
                Ok(())
            }
        });
        worker.register({
            let log = log.clone();
            move |req: LeaveServer| {
                log.lock().unwrap().push(format!("{shard}: leave {}", req.target_server));
                Ok(())
            }
        });
        worker.register({
            let log = log.clone();
            move |req: ReprocessBans| {
                log.lock().unwrap().push(format!(
                    "{shard}: reprocess {} {} {}",
                    req.target_server, req.num_to_retry, req.handling_cooldown
                ));
                Ok(())
            }
        });
    }
    control.register({
        let log = log.clone();
        move |_: BanUser| {
            log.lock().unwrap().push("control received a broadcast".to_owned());
            Ok(())
        }
    });

    common::tick_until(
        &mut server,
        &mut [&mut control, &mut worker1, &mut worker2],
        |server| server.registered_shards() == [0, 1, 2],
    )
    .await?;

    let sender = control.sender().clone();
    assert!(sender.send_ban(77, "alice")?);
    assert!(sender.send_leave_server(501, 2)?);
    assert!(sender.send_reprocess_bans(601, 1, 61, true)?);

    common::tick_until(
        &mut server,
        &mut [&mut control, &mut worker1, &mut worker2],
        |_| log.lock().unwrap().len() >= 4,
    )
    .await?;

    let mut seen = log.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, [
        "1: ban 77",
        "1: reprocess 601 61 true",
        "2: ban 77",
        "2: leave 501",
    ]);

    // workers cannot issue control commands
    assert!(!worker1.sender().send_ping(2)?);

    Ok(())
}

#[tokio::test]
async fn worker_exit_is_detected() -> Result<()> {
    fleetguard_util::test::init_logger("worker_exit_is_detected", "debug");

    let mut server = RelayServer::bind(&RelayAddress::Tcp(0), 0, DEFAULT_MAX_FRAME_LENGTH).await?;
    let address = server.address().cloned().unwrap();

    let mut control = connect(&address, 0).await?;
    control.register(|_: Ping| Ok(()));
    let mut worker = connect(&address, 1).await?;

    common::tick_until(&mut server, &mut [&mut control, &mut worker], |server| {
        server.is_registered(1)
    })
    .await?;

    drop(worker);
    common::tick_until(&mut server, &mut [&mut control], |server| {
        server.has_dead_connections()
    })
    .await?;
    assert!(!server.should_stop());

    Ok(())
}
