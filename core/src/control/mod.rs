use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use fleetguard_relay::{
    Connection, ProcessSupervisor, RelayAddress, RelayClient, RelayServer, ServerId, ShardId,
};
use fleetguard_storage::{BanAction, CooldownRecord, UserId};
use fleetguard_util::futures::JoinTask;
use fleetguard_util::time::now_sec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

pub use self::supervisor::{WorkerFactory, WorkerSupervisor};
use crate::bot::{BotInstance, PropagationSummary};
use crate::executor::{BanResult, ModerationAction};
use crate::platform::{OutgoingMessage, PlatformEvent, UserInfo};

mod supervisor;

/// Control plane of the fleet.
///
/// Owns the relay server and the worker shards, writes the ban list and
/// fans moderation actions out to every shard.
#[derive(Clone)]
pub struct ControlInstance {
    inner: Arc<Inner>,
}

struct Inner {
    bot: BotInstance,
    supervisor: Arc<dyn ProcessSupervisor>,
    relay: Mutex<Option<RelayServer>>,
    client: Mutex<Option<RelayClient>>,
    instances_started: AtomicBool,
}

impl ControlInstance {
    pub fn new(bot: BotInstance, supervisor: Arc<dyn ProcessSupervisor>) -> Result<Self> {
        anyhow::ensure!(
            bot.is_control(),
            "shard {} is not the control shard",
            bot.shard_id()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                bot,
                supervisor,
                relay: Mutex::new(None),
                client: Mutex::new(None),
                instances_started: AtomicBool::new(false),
            }),
        })
    }

    pub fn bot(&self) -> &BotInstance {
        &self.inner.bot
    }

    pub fn instances_started(&self) -> bool {
        self.inner.instances_started.load(Ordering::Acquire)
    }

    // === Relay ===

    /// Binds the relay server and connects the control shard to it.
    pub async fn bind_relay(&self) -> Result<RelayAddress> {
        let config = &self.inner.bot.config().relay;
        let address = config.address_or_default();

        let mut server = RelayServer::bind(
            &address,
            self.inner.bot.shard_id(),
            config.max_frame_length,
        )
        .await
        .with_context(|| format!("failed to bind relay at {address}"))?;

        let address = server.address().cloned().unwrap_or(address);
        self.connect_control_client(&mut server);
        *self.inner.relay.lock() = Some(server);

        tracing::info!(%address, "relay server started");
        Ok(address)
    }

    pub fn relay_address(&self) -> Option<RelayAddress> {
        self.inner
            .relay
            .lock()
            .as_ref()
            .and_then(|server| server.address().cloned())
    }

    fn connect_control_client(&self, server: &mut RelayServer) {
        let bot = &self.inner.bot;

        let (local, remote) = Connection::pair();
        server.attach(remote);

        let mut client =
            RelayClient::from_connection(local, bot.shard_id(), bot.config().control_shard_id);
        bot.register_relay_handlers(&mut client);
        client.send_hello();

        bot.set_relay(Some(client.sender().clone()));
        *self.inner.client.lock() = Some(client);
    }

    /// Reconnects the control shard after the relay dropped every connection.
    ///
    /// Replays queued through the old connections are lost, so cooldowns
    /// marked as processing become eligible for the next sweep again.
    fn reconnect_after_restart(&self, server: &mut RelayServer) {
        self.connect_control_client(server);
        match self.inner.bot.storage().clear_cooldown_processing_flags() {
            Ok(0) => {}
            Ok(released) => tracing::warn!(released, "released cooldowns queued before the relay restart"),
            Err(e) => tracing::error!("failed to release queued cooldowns: {e:?}"),
        }
    }

    /// Starts every worker shard. Does nothing if they are already started unless `force` is set.
    pub fn start_all_instances(&self, force: bool) -> Result<bool> {
        if self.instances_started() && !force {
            return Ok(false);
        }

        {
            let mut relay = self.inner.relay.lock();
            let server = relay.as_mut().context("relay server is not bound")?;

            if force {
                server.restart_all_connections(self.inner.supervisor.as_ref())?;
                self.reconnect_after_restart(server);
            } else {
                let address = server
                    .address()
                    .cloned()
                    .context("relay server has no listen address")?;
                self.inner.supervisor.relaunch_workers(&address)?;
            }
        }

        self.inner.instances_started.store(true, Ordering::Release);
        tracing::info!(
            shards = ?self.inner.supervisor.worker_shards(),
            "all instances started"
        );
        Ok(true)
    }

    /// Routes pending relay traffic once. Returns `false` when the relay has stopped.
    pub fn relay_tick(&self) -> bool {
        {
            let mut relay = self.inner.relay.lock();
            let Some(server) = relay.as_mut() else {
                return false;
            };

            server.tick();
            if server.should_stop() {
                return false;
            }

            if server.has_dead_connections() {
                match server.restart_all_connections(self.inner.supervisor.as_ref()) {
                    Ok(()) => self.reconnect_after_restart(server),
                    Err(e) => tracing::error!("failed to restart relay connections: {e:?}"),
                }
            }
        }

        if let Some(client) = self.inner.client.lock().as_mut() {
            client.recv_messages();
        }
        true
    }

    pub async fn run_relay_loop(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.inner.bot.config().relay.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !self.relay_tick() {
                anyhow::bail!("relay server stopped");
            }
        }
    }

    /// Whether every configured worker shard has registered on the relay.
    pub fn all_workers_registered(&self) -> bool {
        let relay = self.inner.relay.lock();
        let Some(server) = relay.as_ref() else {
            return false;
        };
        self.inner
            .supervisor
            .worker_shards()
            .iter()
            .all(|shard_id| server.is_registered(*shard_id))
    }

    /// Handles platform events and routes relay traffic until either stops.
    pub async fn run(&self) -> Result<()> {
        tokio::select! {
            res = self.run_events() => res,
            res = self.run_relay_loop() => res,
        }
    }

    async fn run_events(&self) -> Result<()> {
        let bot = &self.inner.bot;
        let mut events = bot
            .platform()
            .take_events()
            .context("platform events are already consumed")?;

        while let Some(event) = events.recv().await {
            if let Err(e) = bot.handle_platform_event(&event).await {
                tracing::error!(?event, "failed to handle platform event: {e:?}");
            }
            if event == PlatformEvent::Ready {
                if let Err(e) = self.start_all_instances(false) {
                    tracing::error!("failed to start worker shards: {e:?}");
                }
            }
        }
        Ok(())
    }

    // === Bans ===

    /// Writes the ban list and fans the action out to every shard.
    pub fn handle_ban_action(
        &self,
        target: UserId,
        actor: &UserInfo,
        action: ModerationAction,
        evidence_thread: Option<u64>,
    ) -> BanAction {
        let storage = self.inner.bot.storage();
        let res = match action {
            ModerationAction::Ban => storage.add_ban(target, &actor.name, actor.id, evidence_thread),
            ModerationAction::Unban => storage.remove_ban(target),
            ModerationAction::Kick => {
                tracing::error!(user_id = target, "invalid moderation action for the ban list: {action}");
                return BanAction::DBError;
            }
        };

        let db_action = match res {
            Ok(db_action) => db_action,
            Err(e) => {
                tracing::error!(user_id = target, %action, "failed to update the ban list: {e}");
                return BanAction::DBError;
            }
        };

        if !db_action.is_applied() {
            return db_action;
        }

        let tasks = self.inner.bot.tasks();

        let this = self.clone();
        tasks.spawn("ban_announcement", async move {
            this.create_ban_announcement(target, action).await.map(|_| ())
        });

        let this = self.clone();
        let auth_name = actor.name.clone();
        tasks.spawn("propagate_action", async move {
            this.propagate_action_to_servers(target, &auth_name, action)
                .await
                .map(|_| ())
        });

        db_action
    }

    /// Publishes the action to the announcement channel. Returns whether it was sent.
    pub async fn create_ban_announcement(
        &self,
        target: UserId,
        action: ModerationAction,
    ) -> Result<bool> {
        let bot = &self.inner.bot;
        if bot.config().development_mode {
            tracing::info!(user_id = target, "announcement dropped in development mode");
            return Ok(false);
        }

        let title = match action {
            ModerationAction::Ban => "Ban in Progress",
            ModerationAction::Unban => "Unban in Progress",
            ModerationAction::Kick => return Ok(false),
        };

        let Some(channel_id) = bot.config().announcement_channel else {
            return Ok(false);
        };

        let mut body = String::new();
        if let Ok(user) = bot.platform().fetch_user(target).await {
            body.push_str(&format!("Name: {}\n", user.name));
        }
        body.push_str(&format!("User ID: {target}\n"));

        let ban = bot.storage().get_ban(target)?;
        body.push_str(&format!("Banned: {}", ban.is_some()));
        if let Some(ban) = ban {
            body.push_str(&format!("\nBanned By: {}", ban.assigner_name));
            if let Some(thread) = ban.evidence_thread {
                body.push_str(&format!("\nEvidence Thread: {thread}"));
            }
        }

        let message = OutgoingMessage {
            title: title.to_owned(),
            body,
        };
        match bot.platform().send_message(channel_id, &message).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::warn!(channel_id, "unable to publish announcement: {e}");
                Ok(false)
            }
        }
    }

    /// Broadcasts the action to the workers and applies it in the control shard.
    pub async fn propagate_action_to_servers(
        &self,
        target: UserId,
        auth_name: &str,
        action: ModerationAction,
    ) -> Result<PropagationSummary> {
        let bot = &self.inner.bot;
        match bot.relay() {
            Some(relay) => {
                let sent = match action {
                    ModerationAction::Ban => relay.send_ban(target, auth_name)?,
                    ModerationAction::Unban => relay.send_unban(target, auth_name)?,
                    ModerationAction::Kick => false,
                };
                if !sent {
                    tracing::warn!(user_id = target, %action, "action was not broadcast");
                }
            }
            None => tracing::warn!(user_id = target, %action, "no relay connection, applying locally only"),
        }

        bot.process_action_on_user(target, auth_name, action).await
    }

    // === Reprocessing ===

    /// Replays bans in one server through the shard which owns it.
    pub async fn reprocess_bans_for_server(
        &self,
        server_id: ServerId,
        last_actions: u64,
        handling_cooldown: bool,
    ) -> Result<BanResult> {
        let bot = &self.inner.bot;
        match bot.storage().get_bot_id_for_server(server_id)? {
            Some(shard_id) if shard_id == bot.shard_id() => {
                bot.reprocess_bans(server_id, last_actions, handling_cooldown)
                    .await
            }
            None => Ok(BanResult::Error),
            Some(shard_id) => {
                let relay = bot.relay().context("no relay connection")?;
                relay.send_reprocess_bans(server_id, shard_id, last_actions, handling_cooldown)?;
                Ok(BanResult::Processed)
            }
        }
    }

    pub async fn reprocess_bans_for_instance(
        &self,
        shard_id: ShardId,
        last_actions: u64,
    ) -> Result<bool> {
        let bot = &self.inner.bot;
        if shard_id == bot.shard_id() {
            bot.reprocess_instance(last_actions).await?;
            return Ok(true);
        }

        let relay = bot.relay().context("no relay connection")?;
        Ok(relay.send_reprocess_instance_bans(shard_id, last_actions)?)
    }

    // === Activation ===

    /// Activates the user's servers in every shard. Returns the number of local activations.
    pub async fn activate_user(&self, user_id: UserId) -> Result<usize> {
        let bot = &self.inner.bot;
        if let Some(relay) = bot.relay() {
            relay.send_activation_for_servers(user_id)?;
        }
        bot.activate_servers_with_permissions(user_id).await
    }

    pub async fn deactivate_user(&self, user_id: UserId) -> Result<usize> {
        let bot = &self.inner.bot;
        if let Some(relay) = bot.relay() {
            relay.send_deactivation(user_id)?;
        }
        bot.deactivate_servers_with_permissions(user_id).await
    }

    /// Activates one server through the shard which owns it.
    pub fn activate_server(&self, user_id: UserId, server_id: ServerId) -> Result<bool> {
        let bot = &self.inner.bot;
        match bot.storage().get_bot_id_for_server(server_id)? {
            Some(shard_id) if shard_id == bot.shard_id() => {
                bot.activate_server_instance(user_id, server_id)
            }
            None => Ok(false),
            Some(shard_id) => {
                let relay = bot.relay().context("no relay connection")?;
                Ok(relay.send_server_activation(user_id, server_id, shard_id)?)
            }
        }
    }

    // === Cooldowns ===

    /// Queues the remaining bans of every server in cooldown. Returns the number of queued servers.
    ///
    /// Nothing is queued until every worker shard has registered on the relay.
    pub fn handle_ban_exceed(&self) -> Result<usize> {
        let bot = &self.inner.bot;
        let storage = bot.storage();

        let cooldowns = storage.get_exhausted_servers()?;
        if cooldowns.is_empty() {
            return Ok(0);
        }

        if !self.instances_started() || !self.all_workers_registered() {
            tracing::info!(
                cooldowns = cooldowns.len(),
                "worker shards are not ready, skipping the cooldown sweep"
            );
            return Ok(0);
        }

        let num_bans = storage.get_num_bans()? as u64;
        tracing::info!(cooldowns = cooldowns.len(), "processing cooldown servers");

        let mut queued = 0;
        for CooldownRecord {
            server_id,
            current_position,
            processing,
            ..
        } in cooldowns
        {
            if processing {
                tracing::debug!(server_id, "cooldown is already being processed");
                continue;
            }

            let remaining = num_bans.saturating_sub(current_position);
            if remaining == 0 || storage.get_bot_id_for_server(server_id)?.is_none() {
                tracing::warn!(server_id, remaining, "dropping cooldown without work");
                storage.remove_server_cooldown(server_id)?;
                continue;
            }

            storage.set_processing_server_cooldown(server_id, true)?;

            let this = self.clone();
            bot.tasks().spawn("reprocess_cooldown", async move {
                let res = this.reprocess_bans_for_server(server_id, remaining, true).await;
                if res.is_err() {
                    this.inner
                        .bot
                        .storage()
                        .set_processing_server_cooldown(server_id, false)?;
                }
                res.map(|_| ())
            });
            tracing::info!(server_id, remaining, "queued cooldown reprocessing");
            queued += 1;
        }
        Ok(queued)
    }

    // === Periodic jobs ===

    fn should_defer_jobs(&self) -> bool {
        self.inner.bot.tasks().in_flight() > 0 || !self.instances_started()
    }

    pub fn run_periodic_backup(&self) -> Result<JobOutcome> {
        let Some(config) = &self.inner.bot.config().backup else {
            return Ok(JobOutcome::Completed);
        };

        if self.should_defer_jobs() {
            tracing::warn!(
                "async tasks are in progress, retrying backup in {}",
                humantime::format_duration(config.retry_interval)
            );
            return Ok(JobOutcome::Deferred);
        }

        tracing::info!("periodic storage backup started");
        self.inner.bot.storage().backup(&config.dir)?;
        let removed = cleanup_backups(&config.dir, config.keep_for)?;
        if removed > 0 {
            tracing::info!(removed, "old backups removed");
        }
        Ok(JobOutcome::Completed)
    }

    pub async fn run_periodic_leave(&self) -> Result<JobOutcome> {
        if self.inner.bot.config().idle_cleanup.is_none() {
            return Ok(JobOutcome::Completed);
        }
        if self.should_defer_jobs() {
            return Ok(JobOutcome::Deferred);
        }

        self.leave_inactive_servers(false).await?;
        Ok(JobOutcome::Completed)
    }

    /// Leaves every server which was never activated within the inactive window.
    pub async fn leave_inactive_servers(&self, dry_run: bool) -> Result<IdleCleanupReport> {
        let bot = &self.inner.bot;
        let Some(config) = &bot.config().idle_cleanup else {
            return Ok(IdleCleanupReport::default());
        };

        let threshold = now_sec().saturating_sub(config.inactive_window.as_secs());
        let servers = bot.storage().get_all_deactivated_servers()?;

        let mut report = IdleCleanupReport {
            inactive: servers.len(),
            ..Default::default()
        };
        if !servers.is_empty() {
            tracing::info!(inactive = servers.len(), dry_run, "purging non-activated servers");
        }

        for server in servers {
            if server.created_at >= threshold {
                continue;
            }

            if dry_run {
                tracing::info!(server_id = server.server_id, "would leave server");
                report.left.push(server.server_id);
                continue;
            }

            if bot.leave_server(server.server_id)? {
                tracing::debug!(server_id = server.server_id, "attempting to leave server");
                report.left.push(server.server_id);
            } else {
                tracing::warn!(server_id = server.server_id, "could not send leave request");
            }
            tokio::time::sleep(config.leave_interval).await;
        }

        if !report.left.is_empty() {
            tracing::info!(
                left = report.left.len(),
                inactive = report.inactive,
                "inactive server cleanup completed"
            );
        }
        Ok(report)
    }

    /// Starts the cooldown sweep and the configured periodic jobs.
    ///
    /// Jobs stop when the returned handles are dropped.
    pub fn spawn_periodic_jobs(&self) -> Vec<JoinTask<()>> {
        let config = self.inner.bot.config();
        let mut jobs = Vec::new();

        jobs.push(JoinTask::new({
            let this = self.clone();
            let interval = config.cooldown_sweep_interval;
            async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if let Err(e) = this.handle_ban_exceed() {
                        tracing::error!("cooldown sweep failed: {e:?}");
                    }
                }
            }
        }));

        if let Some(backup) = config.backup.clone() {
            let this = self.clone();
            jobs.push(JoinTask::new(async move {
                let mut delay = backup.interval;
                loop {
                    tokio::time::sleep(delay).await;
                    delay = match this.run_periodic_backup() {
                        Ok(JobOutcome::Deferred) => backup.retry_interval,
                        Ok(JobOutcome::Completed) => backup.interval,
                        Err(e) => {
                            tracing::error!("periodic backup failed: {e:?}");
                            backup.interval
                        }
                    };
                }
            }));
        }

        if let Some(cleanup) = config.idle_cleanup.clone() {
            let this = self.clone();
            jobs.push(JoinTask::new(async move {
                let mut delay = cleanup.interval;
                loop {
                    tokio::time::sleep(delay).await;
                    delay = match this.run_periodic_leave().await {
                        Ok(JobOutcome::Deferred) => cleanup.retry_interval,
                        Ok(JobOutcome::Completed) => cleanup.interval,
                        Err(e) => {
                            tracing::error!("periodic leave failed: {e:?}");
                            cleanup.interval
                        }
                    };
                }
            }));
        }

        jobs
    }

    // === Status ===

    pub fn status(&self) -> Result<FleetStatus> {
        let bot = &self.inner.bot;
        let storage = bot.storage();

        let (registered_shards, connections) = match self.inner.relay.lock().as_ref() {
            Some(server) => (server.registered_shards(), server.connection_count()),
            None => (Vec::new(), 0),
        };

        Ok(FleetStatus {
            control_shard_id: bot.shard_id(),
            worker_shards: self.inner.supervisor.worker_shards(),
            registered_shards,
            relay_connections: connections,
            instances_started: self.instances_started(),
            development_mode: bot.config().development_mode,
            tasks_in_flight: bot.tasks().in_flight(),
            bans: storage.get_num_bans()?,
            servers: storage.get_num_servers()?,
            activated_servers: storage.get_num_activated_servers()?,
            cooldowns: storage.get_exhausted_servers()?.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The job was skipped and should be retried after `retry_interval`.
    Deferred,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleCleanupReport {
    /// Servers which were never activated.
    pub inactive: usize,
    /// Servers older than the inactive window which were left.
    pub left: Vec<ServerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub control_shard_id: ShardId,
    pub worker_shards: Vec<ShardId>,
    pub registered_shards: Vec<ShardId>,
    pub relay_connections: usize,
    pub instances_started: bool,
    pub development_mode: bool,
    pub tasks_in_flight: usize,
    pub bans: usize,
    pub servers: usize,
    pub activated_servers: usize,
    pub cooldowns: usize,
}

/// Removes backup entries older than `keep_for`. Returns the number of removed entries.
fn cleanup_backups(dir: &Path, keep_for: Duration) -> Result<usize> {
    let Some(threshold) = SystemTime::now().checked_sub(keep_for) else {
        return Ok(0);
    };
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.modified()? >= threshold {
            continue;
        }

        let path = entry.path();
        let res = if metadata.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match res {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), "failed to remove backup: {e}"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_backups_are_kept() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("storage-1"))?;
        std::fs::write(dir.path().join("storage-2"), b"")?;

        assert_eq!(cleanup_backups(dir.path(), Duration::from_secs(3600))?, 0);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cleanup_backups(dir.path(), Duration::ZERO)?, 2);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);

        assert_eq!(cleanup_backups(&dir.path().join("missing"), Duration::ZERO)?, 0);
        Ok(())
    }
}
