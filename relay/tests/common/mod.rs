use std::time::Duration;

use anyhow::Result;
use fleetguard_relay::{RelayClient, RelayServer};

pub const STEP: Duration = Duration::from_millis(10);

/// Ticks the server and polls every client until `done` holds.
pub async fn tick_until<F>(
    server: &mut RelayServer,
    clients: &mut [&mut RelayClient],
    mut done: F,
) -> Result<()>
where
    F: FnMut(&RelayServer) -> bool,
{
    for _ in 0..500 {
        server.tick();
        for client in clients.iter_mut() {
            client.recv_messages();
        }
        if done(server) {
            return Ok(());
        }
        tokio::time::sleep(STEP).await;
    }
    anyhow::bail!("condition not reached in time")
}
