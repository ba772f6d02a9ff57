use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use fleetguard_storage::{ChannelId, ServerId, ShardId, UserId};
use fleetguard_util::{FastHashMap, FastHashSet, serde_helpers};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::*;

/// Servers and users of a [`LocalPlatform`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformFixture {
    pub servers: Vec<FixtureServer>,
    pub users: Vec<UserInfo>,
}

impl PlatformFixture {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        serde_helpers::load_json_from_file(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureServer {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
    /// Shard whose session sees this server.
    #[serde(default)]
    pub shard_id: ShardId,
    #[serde(default)]
    pub members: Vec<FixtureMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMember {
    pub user_id: UserId,
    #[serde(default)]
    pub permissions: MemberPermissions,
}

/// A call made against a [`LocalPlatform`], successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Ban {
        server_id: ServerId,
        user_id: UserId,
        reason: String,
    },
    Unban {
        server_id: ServerId,
        user_id: UserId,
        reason: String,
    },
    Kick {
        server_id: ServerId,
        user_id: UserId,
        reason: String,
    },
    SendMessage {
        channel_id: ChannelId,
        message: OutgoingMessage,
    },
    LeaveServer {
        server_id: ServerId,
    },
}

impl PlatformCall {
    pub fn server_id(&self) -> Option<ServerId> {
        match self {
            Self::Ban { server_id, .. }
            | Self::Unban { server_id, .. }
            | Self::Kick { server_id, .. }
            | Self::LeaveServer { server_id } => Some(*server_id),
            Self::SendMessage { .. } => None,
        }
    }
}

/// In-process platform session.
///
/// Keeps server membership and ban lists in memory, records every call
/// and can be scripted to fail. Used for development runs and tests.
pub struct LocalPlatform {
    inner: Mutex<Inner>,
    events_tx: mpsc::UnboundedSender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
}

#[derive(Default)]
struct Inner {
    servers: BTreeMap<ServerId, LocalServer>,
    users: FastHashMap<UserId, UserInfo>,
    calls: Vec<PlatformCall>,
    failures: FastHashMap<ServerId, VecDeque<PlatformError>>,
    ban_quotas: FastHashMap<ServerId, usize>,
}

struct LocalServer {
    info: ServerInfo,
    members: FastHashMap<UserId, MemberPermissions>,
    banned: FastHashSet<UserId>,
}

impl Default for LocalPlatform {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }
}

impl LocalPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the session of one shard. Queues [`PlatformEvent::Ready`].
    pub fn from_fixture(fixture: &PlatformFixture, shard_id: ShardId) -> Self {
        let platform = Self::new();
        for user in &fixture.users {
            platform.add_user(user.clone());
        }
        for server in &fixture.servers {
            if server.shard_id != shard_id {
                continue;
            }
            platform.add_server(ServerInfo {
                id: server.id,
                name: server.name.clone(),
                owner_id: server.owner_id,
            });
            for member in &server.members {
                platform.add_member(server.id, member.user_id, member.permissions);
            }
        }
        platform.emit(PlatformEvent::Ready);
        platform
    }

    pub fn add_server(&self, info: ServerInfo) {
        let mut inner = self.inner.lock();
        inner.servers.insert(info.id, LocalServer {
            info,
            members: FastHashMap::default(),
            banned: FastHashSet::default(),
        });
    }

    pub fn add_user(&self, user: UserInfo) {
        self.inner.lock().users.insert(user.id, user);
    }

    pub fn add_member(&self, server_id: ServerId, user_id: UserId, permissions: MemberPermissions) {
        if let Some(server) = self.inner.lock().servers.get_mut(&server_id) {
            server.members.insert(user_id, permissions);
        }
    }

    /// Adds the server and emits [`PlatformEvent::ServerJoined`].
    pub fn join_server(&self, info: ServerInfo) {
        self.add_server(info.clone());
        self.emit(PlatformEvent::ServerJoined(info));
    }

    /// Changes the owner and emits [`PlatformEvent::ServerUpdated`].
    pub fn transfer_ownership(&self, server_id: ServerId, owner_id: UserId) -> bool {
        let (before, after) = {
            let mut inner = self.inner.lock();
            let Some(server) = inner.servers.get_mut(&server_id) else {
                return false;
            };
            let before = server.info.clone();
            server.info.owner_id = owner_id;
            (before, server.info.clone())
        };
        self.emit(PlatformEvent::ServerUpdated { before, after });
        true
    }

    pub fn emit(&self, event: PlatformEvent) {
        // NOTE: the receiver is dropped only when nobody listens for events
        let _ = self.events_tx.send(event);
    }

    /// Makes the next call against the server fail with `error`.
    pub fn fail_next(&self, server_id: ServerId, error: PlatformError) {
        let mut inner = self.inner.lock();
        inner
            .failures
            .entry(server_id)
            .or_default()
            .push_back(error);
    }

    /// Allows `count` more bans in the server, then reports an exceeded quota.
    pub fn set_ban_quota(&self, server_id: ServerId, count: usize) {
        self.inner.lock().ban_quotas.insert(server_id, count);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.inner.lock().calls.clone()
    }

    pub fn calls_for(&self, server_id: ServerId) -> Vec<PlatformCall> {
        let inner = self.inner.lock();
        inner
            .calls
            .iter()
            .filter(|call| call.server_id() == Some(server_id))
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<(ChannelId, OutgoingMessage)> {
        let inner = self.inner.lock();
        inner
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::SendMessage {
                    channel_id,
                    message,
                } => Some((*channel_id, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn is_banned(&self, server_id: ServerId, user_id: UserId) -> bool {
        let inner = self.inner.lock();
        inner
            .servers
            .get(&server_id)
            .is_some_and(|server| server.banned.contains(&user_id))
    }

    fn moderate<F>(&self, server_id: ServerId, call: PlatformCall, f: F) -> PlatformResult<()>
    where
        F: FnOnce(&mut LocalServer, Option<&mut usize>) -> PlatformResult<()>,
    {
        let mut inner = self.inner.lock();
        inner.calls.push(call);

        if let Some(error) = inner
            .failures
            .get_mut(&server_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let Inner {
            servers,
            ban_quotas,
            ..
        } = &mut *inner;
        let server = servers.get_mut(&server_id).ok_or(PlatformError::NotFound)?;
        f(server, ban_quotas.get_mut(&server_id))
    }
}

#[async_trait]
impl Platform for LocalPlatform {
    fn servers(&self) -> Vec<ServerInfo> {
        let inner = self.inner.lock();
        inner.servers.values().map(|s| s.info.clone()).collect()
    }

    fn get_server(&self, server_id: ServerId) -> Option<ServerInfo> {
        let inner = self.inner.lock();
        inner.servers.get(&server_id).map(|s| s.info.clone())
    }

    async fn ban(&self, server_id: ServerId, user_id: UserId, reason: &str) -> PlatformResult<()> {
        let call = PlatformCall::Ban {
            server_id,
            user_id,
            reason: reason.to_owned(),
        };
        self.moderate(server_id, call, |server, quota| {
            if let Some(quota) = quota {
                if *quota == 0 {
                    return Err(PlatformError::quota_exceeded());
                }
                *quota -= 1;
            }
            server.members.remove(&user_id);
            server.banned.insert(user_id);
            Ok(())
        })
    }

    async fn unban(
        &self,
        server_id: ServerId,
        user_id: UserId,
        reason: &str,
    ) -> PlatformResult<()> {
        let call = PlatformCall::Unban {
            server_id,
            user_id,
            reason: reason.to_owned(),
        };
        self.moderate(server_id, call, |server, _| {
            if server.banned.remove(&user_id) {
                Ok(())
            } else {
                Err(PlatformError::NotFound)
            }
        })
    }

    async fn kick(&self, server_id: ServerId, user_id: UserId, reason: &str) -> PlatformResult<()> {
        let call = PlatformCall::Kick {
            server_id,
            user_id,
            reason: reason.to_owned(),
        };
        self.moderate(server_id, call, |server, _| {
            match server.members.remove(&user_id) {
                Some(_) => Ok(()),
                None => Err(PlatformError::NotFound),
            }
        })
    }

    async fn fetch_user(&self, user_id: UserId) -> PlatformResult<UserInfo> {
        let inner = self.inner.lock();
        inner
            .users
            .get(&user_id)
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    async fn fetch_member(
        &self,
        server_id: ServerId,
        user_id: UserId,
    ) -> PlatformResult<MemberInfo> {
        let inner = self.inner.lock();
        let server = inner.servers.get(&server_id).ok_or(PlatformError::NotFound)?;
        let permissions = *server.members.get(&user_id).ok_or(PlatformError::NotFound)?;
        let user = inner.users.get(&user_id).cloned().unwrap_or_else(|| UserInfo {
            id: user_id,
            name: user_id.to_string(),
        });
        Ok(MemberInfo {
            server_id,
            user,
            permissions,
        })
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        message: &OutgoingMessage,
    ) -> PlatformResult<()> {
        self.inner.lock().calls.push(PlatformCall::SendMessage {
            channel_id,
            message: message.clone(),
        });
        Ok(())
    }

    async fn leave_server(&self, server_id: ServerId) -> PlatformResult<()> {
        let info = {
            let mut inner = self.inner.lock();
            inner.calls.push(PlatformCall::LeaveServer { server_id });
            if let Some(error) = inner
                .failures
                .get_mut(&server_id)
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            match inner.servers.remove(&server_id) {
                Some(server) => server.info,
                None => return Err(PlatformError::NotFound),
            }
        };
        self.emit(PlatformEvent::ServerRemoved(info));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>> {
        self.events_rx.lock().take()
    }
}
