use std::path::Path;

use fleetguard_core::{BanResult, FleetStatus, IdleCleanupReport};
use fleetguard_storage::{BanAction, BanRecord, CooldownRecord, ServerId, ShardId, UserId};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::{client, context};

use crate::error::ClientResult;
use crate::proto::*;

pub struct ControlClient {
    inner: ControlServerClient,
}

impl ControlClient {
    pub async fn connect<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let mut connect = tarpc::serde_transport::unix::connect(path, Bincode::default);
        connect.config_mut().max_frame_length(usize::MAX);
        let transport = connect.await?;

        let inner = ControlServerClient::new(client::Config::default(), transport).spawn();

        Ok(Self { inner })
    }

    pub async fn ping(&self) -> ClientResult<u64> {
        self.inner.ping(current_context()).await.map_err(Into::into)
    }

    pub async fn get_status(&self) -> ClientResult<FleetStatus> {
        Ok(self.inner.get_status(current_context()).await??)
    }

    pub async fn ban_user(
        &self,
        user_id: UserId,
        moderator: ModeratorInfo,
        evidence_thread: Option<u64>,
    ) -> ClientResult<BanAction> {
        let req = BanUserRequest {
            user_id,
            moderator,
            evidence_thread,
        };
        Ok(self.inner.ban_user(current_context(), req).await??)
    }

    pub async fn unban_user(
        &self,
        user_id: UserId,
        moderator: ModeratorInfo,
    ) -> ClientResult<BanAction> {
        let req = UnbanUserRequest { user_id, moderator };
        Ok(self.inner.unban_user(current_context(), req).await??)
    }

    pub async fn lookup_ban(&self, user_id: UserId) -> ClientResult<Option<BanRecord>> {
        Ok(self.inner.lookup_ban(current_context(), user_id).await??)
    }

    pub async fn reprocess_server(
        &self,
        server_id: ServerId,
        last_actions: u64,
    ) -> ClientResult<BanResult> {
        let req = ReprocessServerRequest {
            server_id,
            last_actions,
        };
        Ok(self.inner.reprocess_server(current_context(), req).await??)
    }

    pub async fn reprocess_instance(
        &self,
        shard_id: ShardId,
        last_actions: u64,
    ) -> ClientResult<bool> {
        let req = ReprocessInstanceRequest {
            shard_id,
            last_actions,
        };
        Ok(self
            .inner
            .reprocess_instance(current_context(), req)
            .await??)
    }

    pub async fn leave_server(&self, server_id: ServerId) -> ClientResult<bool> {
        Ok(self.inner.leave_server(current_context(), server_id).await??)
    }

    pub async fn activate_user(&self, user_id: UserId) -> ClientResult<usize> {
        Ok(self.inner.activate_user(current_context(), user_id).await??)
    }

    pub async fn deactivate_user(&self, user_id: UserId) -> ClientResult<usize> {
        Ok(self
            .inner
            .deactivate_user(current_context(), user_id)
            .await??)
    }

    pub async fn activate_server(&self, user_id: UserId, server_id: ServerId) -> ClientResult<bool> {
        let req = ActivateServerRequest { user_id, server_id };
        Ok(self.inner.activate_server(current_context(), req).await??)
    }

    pub async fn list_cooldowns(&self) -> ClientResult<Vec<CooldownRecord>> {
        Ok(self.inner.list_cooldowns(current_context()).await??)
    }

    pub async fn run_cooldown_sweep(&self) -> ClientResult<usize> {
        Ok(self.inner.run_cooldown_sweep(current_context()).await??)
    }

    pub async fn run_inactive_cleanup(&self, dry_run: bool) -> ClientResult<IdleCleanupReport> {
        Ok(self
            .inner
            .run_inactive_cleanup(current_context(), dry_run)
            .await??)
    }
}

// Inactive server cleanup sleeps between leave requests, so the default 10s deadline is too short
fn current_context() -> context::Context {
    use std::time::{Duration, SystemTime};

    let mut context = context::current();
    context.deadline = SystemTime::now() + Duration::from_secs(600);
    context
}
