use anyhow::{Context, Result};
use fleetguard_relay::message::*;
use fleetguard_relay::{RelayAddress, RelayClient};
use tokio::time::MissedTickBehavior;

use super::BotInstance;
use crate::platform::PlatformEvent;

impl BotInstance {
    /// Routes every relay message type to this instance.
    pub fn register_relay_handlers(&self, client: &mut RelayClient) {
        let shard_id = self.shard_id();

        client.register(move |_: Hello| {
            tracing::debug!(shard_id, "hello received");
            Ok(())
        });
        client.register(move |_: Ping| {
            tracing::info!(shard_id, "pong");
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: BanUser| {
            this.ban_user(req.target_user, req.auth_name);
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: UnbanUser| {
            this.unban_user(req.target_user, req.auth_name);
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: LeaveServer| {
            let bot = this.clone();
            this.tasks().spawn("force_leave_server", async move {
                bot.force_leave_server(req.target_server).await.map(|_| ())
            });
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: ReprocessBans| {
            this.schedule_reprocess_bans(req.target_server, req.num_to_retry, req.handling_cooldown);
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: ReprocessInstance| {
            this.schedule_reprocess_instance(req.num_to_retry);
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: ProcessActivation| {
            this.schedule_activation(req.target_user);
            Ok(())
        });

        let this = self.clone();
        client.register(move |req: ProcessServerActivation| {
            this.activate_server_instance(req.target_user, req.target_server)
                .map(|_| ())
        });

        let this = self.clone();
        client.register(move |req: ProcessDeactivation| {
            this.schedule_deactivation(req.target_user);
            Ok(())
        });
    }

    /// Connects to the relay and dispatches messages until the connection is lost.
    pub async fn run_relay_client(&self, address: &RelayAddress) -> Result<()> {
        let config = &self.config().relay;
        let mut client = RelayClient::connect(
            address,
            self.shard_id(),
            self.config().control_shard_id,
            config.max_frame_length,
        )
        .await
        .with_context(|| format!("failed to connect to relay at {address}"))?;

        self.register_relay_handlers(&mut client);
        self.set_relay(Some(client.sender().clone()));
        let _relay_guard = scopeguard::guard(self.clone(), |this| this.set_relay(None));

        if !client.send_hello() {
            anyhow::bail!("failed to register shard {} on the relay", self.shard_id());
        }

        let mut interval = tokio::time::interval(config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while client.is_connected() {
            interval.tick().await;
            client.recv_messages();
        }

        tracing::warn!(shard_id = self.shard_id(), "relay connection closed");
        Ok(())
    }

    /// Runs a worker shard until either its platform session or relay connection ends.
    pub async fn run_worker(&self, address: RelayAddress) -> Result<()> {
        tracing::info!(shard_id = self.shard_id(), %address, "starting worker shard");
        tokio::select! {
            res = self.run_events() => res,
            res = self.run_relay_client(&address) => res,
        }
    }

    /// Handles platform events until the stream ends.
    pub async fn run_events(&self) -> Result<()> {
        let mut events = self
            .platform()
            .take_events()
            .context("platform events are already consumed")?;

        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_platform_event(&event).await {
                tracing::error!(shard_id = self.shard_id(), ?event, "failed to handle platform event: {e:?}");
            }
        }
        Ok(())
    }

    pub async fn handle_platform_event(&self, event: &PlatformEvent) -> Result<()> {
        match event {
            PlatformEvent::Ready => {
                self.initialize()?;
            }
            PlatformEvent::ServerJoined(server) => self.on_server_joined(server).await?,
            PlatformEvent::ServerRemoved(server) => {
                self.on_server_removed(server.id)?;
            }
            PlatformEvent::ServerUpdated { before, after } => {
                self.on_server_updated(before, after)?;
            }
        }
        Ok(())
    }
}
