use std::path::{Path, PathBuf};

use fleetguard_core::platform::UserInfo;
use fleetguard_core::{BanResult, ControlInstance, FleetStatus, IdleCleanupReport, ModerationAction};
use fleetguard_storage::{BanAction, BanRecord, CooldownRecord, ServerId, UserId};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tarpc::context::Context;
use tarpc::server::Channel;

use crate::error::{ServerError, ServerResult};
use crate::proto::{self, ControlServer as _};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlServerConfig {
    /// Whether to recreate the socket file if it already exists.
    ///
    /// Default: `false`
    pub overwrite_socket: bool,

    /// Maximum number of parallel connections.
    ///
    /// Default: `16`
    pub max_connections: usize,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self {
            overwrite_socket: false,
            max_connections: 16,
        }
    }
}

/// Operator endpoint listening on a unix socket.
///
/// The socket file is removed when the endpoint is dropped.
pub struct ControlEndpoint {
    inner: BoxFuture<'static, ()>,
    socket_path: PathBuf,
}

impl ControlEndpoint {
    pub async fn bind<P: AsRef<Path>>(
        config: &ControlServerConfig,
        server: ControlServer,
        socket_path: P,
    ) -> std::io::Result<Self> {
        use tarpc::tokio_serde::formats::Bincode;

        let socket_path = socket_path.as_ref().to_path_buf();
        if config.overwrite_socket && socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let mut listener =
            tarpc::serde_transport::unix::listen(&socket_path, Bincode::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);

        tracing::info!(socket_path = %socket_path.display(), "control endpoint started");

        let inner = listener
            // Ignore accept errors.
            .filter_map(|r| futures_util::future::ready(r.ok()))
            .map(tarpc::server::BaseChannel::with_defaults)
            .map(move |channel| {
                channel.execute(server.clone().serve()).for_each(|f| {
                    tokio::spawn(f);
                    futures_util::future::ready(())
                })
            })
            .buffer_unordered(config.max_connections)
            .for_each(|_| async {})
            .boxed();

        Ok(Self { inner, socket_path })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn serve(mut self) {
        (&mut self.inner).await;
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        _ = std::fs::remove_file(&self.socket_path);
    }
}

#[derive(Clone)]
#[repr(transparent)]
pub struct ControlServer {
    control: ControlInstance,
}

impl ControlServer {
    pub fn new(control: ControlInstance) -> Self {
        Self { control }
    }

    fn handle_ban(
        &self,
        user_id: UserId,
        moderator: proto::ModeratorInfo,
        action: ModerationAction,
        evidence_thread: Option<u64>,
    ) -> ServerResult<BanAction> {
        let actor = UserInfo {
            id: moderator.id,
            name: moderator.name,
        };
        match self
            .control
            .handle_ban_action(user_id, &actor, action, evidence_thread)
        {
            BanAction::DBError => Err(ServerError::new("failed to update the ban list")),
            action => Ok(action),
        }
    }
}

impl proto::ControlServer for ControlServer {
    async fn ping(self, _: Context) -> u64 {
        fleetguard_util::time::now_millis()
    }

    async fn get_status(self, _: Context) -> ServerResult<FleetStatus> {
        self.control.status().map_err(Into::into)
    }

    async fn ban_user(self, _: Context, req: proto::BanUserRequest) -> ServerResult<BanAction> {
        self.handle_ban(
            req.user_id,
            req.moderator,
            ModerationAction::Ban,
            req.evidence_thread,
        )
    }

    async fn unban_user(self, _: Context, req: proto::UnbanUserRequest) -> ServerResult<BanAction> {
        self.handle_ban(req.user_id, req.moderator, ModerationAction::Unban, None)
    }

    async fn lookup_ban(self, _: Context, user_id: UserId) -> ServerResult<Option<BanRecord>> {
        self.control
            .bot()
            .storage()
            .get_ban(user_id)
            .map_err(Into::into)
    }

    async fn reprocess_server(
        self,
        _: Context,
        req: proto::ReprocessServerRequest,
    ) -> ServerResult<BanResult> {
        self.control
            .reprocess_bans_for_server(req.server_id, req.last_actions, false)
            .await
            .map_err(Into::into)
    }

    async fn reprocess_instance(
        self,
        _: Context,
        req: proto::ReprocessInstanceRequest,
    ) -> ServerResult<bool> {
        self.control
            .reprocess_bans_for_instance(req.shard_id, req.last_actions)
            .await
            .map_err(Into::into)
    }

    async fn leave_server(self, _: Context, server_id: ServerId) -> ServerResult<bool> {
        self.control.bot().leave_server(server_id).map_err(Into::into)
    }

    async fn activate_user(self, _: Context, user_id: UserId) -> ServerResult<usize> {
        self.control.activate_user(user_id).await.map_err(Into::into)
    }

    async fn deactivate_user(self, _: Context, user_id: UserId) -> ServerResult<usize> {
        self.control.deactivate_user(user_id).await.map_err(Into::into)
    }

    async fn activate_server(
        self,
        _: Context,
        req: proto::ActivateServerRequest,
    ) -> ServerResult<bool> {
        self.control
            .activate_server(req.user_id, req.server_id)
            .map_err(Into::into)
    }

    async fn list_cooldowns(self, _: Context) -> ServerResult<Vec<CooldownRecord>> {
        self.control
            .bot()
            .storage()
            .get_exhausted_servers()
            .map_err(Into::into)
    }

    async fn run_cooldown_sweep(self, _: Context) -> ServerResult<usize> {
        self.control.handle_ban_exceed().map_err(Into::into)
    }

    async fn run_inactive_cleanup(
        self,
        _: Context,
        dry_run: bool,
    ) -> ServerResult<IdleCleanupReport> {
        self.control
            .leave_inactive_servers(dry_run)
            .await
            .map_err(Into::into)
    }
}
