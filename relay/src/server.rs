use bytes::Bytes;
use fleetguard_util::{FastHashMap, FastHashSet};

use crate::error::RelayError;
use crate::message::{NO_SHARD, RelayMessage, RelayMessageType, ShardId};
use crate::supervisor::ProcessSupervisor;
use crate::transport::{Connection, RelayAddress, RelayListener};

pub type ConnectionId = u64;

/// Routes relay frames between the control process and worker shards.
///
/// The server is polled: every [`tick`] accepts new connections and
/// forwards all buffered frames without waiting on any peer.
///
/// [`tick`]: RelayServer::tick
pub struct RelayServer {
    control_shard_id: ShardId,
    listener: Option<RelayListener>,
    pending: Vec<Connection>,
    connections: Vec<(ConnectionId, Connection)>,
    registry: FastHashMap<ShardId, ConnectionId>,
    dead: FastHashSet<ConnectionId>,
    next_connection_id: ConnectionId,
    should_stop: bool,
}

impl RelayServer {
    /// Creates a server without a listener. Connections are added with [`attach`].
    ///
    /// [`attach`]: RelayServer::attach
    pub fn new(control_shard_id: ShardId) -> Self {
        Self {
            control_shard_id,
            listener: None,
            pending: Vec::new(),
            connections: Vec::new(),
            registry: FastHashMap::default(),
            dead: FastHashSet::default(),
            next_connection_id: 0,
            should_stop: false,
        }
    }

    pub async fn bind(
        address: &RelayAddress,
        control_shard_id: ShardId,
        max_frame_length: usize,
    ) -> Result<Self, RelayError> {
        let listener = RelayListener::bind(address, max_frame_length).await?;
        Ok(Self {
            listener: Some(listener),
            ..Self::new(control_shard_id)
        })
    }

    pub fn address(&self) -> Option<&RelayAddress> {
        self.listener.as_ref().map(RelayListener::address)
    }

    pub fn control_shard_id(&self) -> ShardId {
        self.control_shard_id
    }

    /// Queues a connection to be picked up by the next [`accept_pending`].
    ///
    /// [`accept_pending`]: RelayServer::accept_pending
    pub fn attach(&mut self, connection: Connection) {
        self.pending.push(connection);
    }

    pub fn is_registered(&self, shard_id: ShardId) -> bool {
        self.registry.contains_key(&shard_id)
    }

    pub fn registered_shards(&self) -> Vec<ShardId> {
        let mut shards = self.registry.keys().copied().collect::<Vec<_>>();
        shards.sort_unstable();
        shards
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_dead_connections(&self) -> bool {
        !self.dead.is_empty()
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop
    }

    /// Accepts and routes everything available right now.
    ///
    /// An unexpected error stops the relay until the next
    /// [`restart_all_connections`].
    ///
    /// [`restart_all_connections`]: RelayServer::restart_all_connections
    pub fn tick(&mut self) {
        if self.should_stop {
            return;
        }

        if let Err(e) = self.tick_impl() {
            tracing::error!("relay server failed: {e}");
            self.should_stop = true;
        }
    }

    fn tick_impl(&mut self) -> Result<(), RelayError> {
        self.accept_pending()?;
        self.drain_incoming()?;
        Ok(())
    }

    /// Moves newly accepted connections to the open set.
    pub fn accept_pending(&mut self) -> Result<usize, RelayError> {
        let mut accepted = std::mem::take(&mut self.pending);
        if let Some(listener) = &mut self.listener {
            while let Some(connection) = listener.try_accept()? {
                accepted.push(connection);
            }
        }

        let count = accepted.len();
        for connection in accepted {
            let id = self.next_connection_id;
            self.next_connection_id += 1;
            tracing::debug!(connection_id = id, "relay connection accepted");
            self.connections.push((id, connection));
        }
        Ok(count)
    }

    /// Reads every buffered frame and routes it. Returns the number of frames read.
    ///
    /// A closed connection is marked dead but stays in the open set.
    pub fn drain_incoming(&mut self) -> Result<usize, RelayError> {
        let mut inbox = Vec::new();
        for (id, connection) in &mut self.connections {
            if self.dead.contains(id) {
                continue;
            }

            loop {
                match connection.try_recv() {
                    Ok(Some(frame)) => inbox.push((*id, frame)),
                    Ok(None) => break,
                    Err(RelayError::ConnectionClosed) => {
                        tracing::warn!(connection_id = *id, "relay connection closed");
                        self.dead.insert(*id);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let count = inbox.len();
        for (from, frame) in inbox {
            self.route(from, frame)?;
        }
        Ok(count)
    }

    fn route(&mut self, from: ConnectionId, frame: Bytes) -> Result<(), RelayError> {
        let message = match RelayMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(connection_id = from, "dropping relay frame: {e}");
                return Ok(());
            }
        };

        let kind = message.kind();
        if kind == RelayMessageType::Hello {
            self.register(from, message.sender);
            return Ok(());
        }

        if kind.is_broadcast() {
            let control = self.registry.get(&self.control_shard_id).copied();
            for (id, connection) in &self.connections {
                if Some(*id) == control || self.dead.contains(id) {
                    continue;
                }
                if connection.send(frame.clone()).is_err() {
                    tracing::warn!(connection_id = *id, %kind, "failed to forward broadcast");
                    self.dead.insert(*id);
                }
            }
            return Ok(());
        }

        let destination = message.destination;
        if destination < 0 {
            tracing::warn!(%kind, sender = message.sender, "relay message without destination");
            return Ok(());
        }

        let Some(&id) = self.registry.get(&destination) else {
            tracing::warn!(%kind, destination, "relay destination is not registered");
            return Ok(());
        };

        let connection = self
            .connections
            .iter()
            .find_map(|(cid, connection)| (*cid == id).then_some(connection))
            .ok_or(RelayError::UnknownConnection(id))?;

        if connection.send(frame).is_err() {
            tracing::warn!(%kind, destination, "failed to forward relay message");
            self.dead.insert(id);
        }
        Ok(())
    }

    fn register(&mut self, connection_id: ConnectionId, shard_id: ShardId) {
        if shard_id == NO_SHARD {
            tracing::warn!(connection_id, "ignoring hello without a sender id");
            return;
        }

        match self.registry.get(&shard_id) {
            Some(existing) => {
                tracing::warn!(
                    shard_id,
                    connection_id,
                    existing = *existing,
                    "shard already registered, ignoring hello"
                );
            }
            None => {
                tracing::info!(shard_id, connection_id, "shard registered");
                self.registry.insert(shard_id, connection_id);
            }
        }
    }

    /// Drops every connection and registration and relaunches all workers.
    ///
    /// The listener stays bound so relaunched workers can reconnect.
    pub fn restart_all_connections(
        &mut self,
        supervisor: &dyn ProcessSupervisor,
    ) -> anyhow::Result<()> {
        tracing::warn!(
            connections = self.connections.len(),
            dead = self.dead.len(),
            "restarting all relay connections"
        );

        self.connections.clear();
        self.pending.clear();
        self.registry.clear();
        self.dead.clear();
        self.should_stop = false;

        match self.address() {
            Some(address) => supervisor.relaunch_workers(address),
            None => Ok(()),
        }
    }
}
