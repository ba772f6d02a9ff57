use fleetguard_util::FastHashMap;

use crate::error::RelayError;
use crate::message::*;
use crate::transport::{Connection, FrameSender, RelayAddress};

type Handler = Box<dyn FnMut(RelayPayload) -> anyhow::Result<()> + Send>;

/// Single relay connection of one process with typed dispatch.
pub struct RelayClient {
    sender: RelaySender,
    connection: Option<Connection>,
    hello_sent: bool,
    handlers: FastHashMap<RelayMessageType, Handler>,
}

impl RelayClient {
    pub async fn connect(
        address: &RelayAddress,
        shard_id: ShardId,
        control_shard_id: ShardId,
        max_frame_length: usize,
    ) -> Result<Self, RelayError> {
        let connection = Connection::connect(address, max_frame_length).await?;
        tracing::info!(shard_id, %address, "connected to relay");
        Ok(Self::from_connection(connection, shard_id, control_shard_id))
    }

    pub fn from_connection(
        connection: Connection,
        shard_id: ShardId,
        control_shard_id: ShardId,
    ) -> Self {
        Self {
            sender: RelaySender {
                shard_id,
                control_shard_id,
                frames: connection.sender(),
            },
            connection: Some(connection),
            hello_sent: false,
            handlers: FastHashMap::default(),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.sender.shard_id
    }

    pub fn sender(&self) -> &RelaySender {
        &self.sender
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Registers this shard on the relay. Does nothing when already sent.
    pub fn send_hello(&mut self) -> bool {
        if self.connection.is_none() {
            tracing::warn!(shard_id = self.shard_id(), "hello without a relay connection");
            return false;
        }
        if self.hello_sent {
            tracing::warn!(shard_id = self.shard_id(), "hello already sent");
            return false;
        }

        match self.sender.send(NO_SHARD, Hello) {
            Ok(()) => {
                self.hello_sent = true;
                true
            }
            Err(e) => {
                tracing::warn!(shard_id = self.shard_id(), "failed to send hello: {e}");
                false
            }
        }
    }

    /// Registers a handler for one message type.
    ///
    /// Returns `false` and keeps the existing handler if one is already set.
    pub fn register<R, F>(&mut self, mut handler: F) -> bool
    where
        R: RelayRequest,
        F: FnMut(R) -> anyhow::Result<()> + Send + 'static,
    {
        if self.handlers.contains_key(&R::KIND) {
            tracing::warn!(kind = %R::KIND, "relay handler already registered");
            return false;
        }

        self.handlers.insert(
            R::KIND,
            Box::new(move |payload| match R::from_payload(payload) {
                Some(request) => handler(request),
                None => anyhow::bail!("unexpected payload for {}", R::KIND),
            }),
        );
        true
    }

    /// Dispatches all buffered messages. Returns the number of dispatched messages.
    ///
    /// An invalid message or a message without a handler is dropped and stops
    /// the drain. The rest stays buffered. Handler errors are logged and skipped.
    pub fn recv_messages(&mut self) -> usize {
        let shard_id = self.sender.shard_id;
        let Some(connection) = &mut self.connection else {
            return 0;
        };

        let mut dispatched = 0;
        let mut lost = false;
        loop {
            let frame = match connection.try_recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(shard_id, "relay connection lost: {e}");
                    lost = true;
                    break;
                }
            };

            let message = match RelayMessage::decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(shard_id, "stopping relay drain: {e}");
                    break;
                }
            };

            let kind = message.kind();
            let Some(handler) = self.handlers.get_mut(&kind) else {
                tracing::warn!(shard_id, %kind, "stopping relay drain, no handler registered");
                break;
            };

            tracing::debug!(shard_id, %kind, sender = message.sender, "relay message received");
            if let Err(e) = handler(message.payload) {
                tracing::error!(shard_id, %kind, "relay handler failed: {e:?}");
            }
            dispatched += 1;
        }

        if lost {
            self.connection = None;
        }
        dispatched
    }

    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            tracing::info!(shard_id = self.shard_id(), "disconnected from relay");
        }
    }
}

/// Typed relay senders.
///
/// Control-plane senders return `Ok(false)` without sending unless this
/// is the control shard.
#[derive(Debug, Clone)]
pub struct RelaySender {
    shard_id: ShardId,
    control_shard_id: ShardId,
    frames: FrameSender,
}

impl RelaySender {
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn control_shard_id(&self) -> ShardId {
        self.control_shard_id
    }

    pub fn is_control(&self) -> bool {
        self.shard_id == self.control_shard_id
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    pub fn send<P: Into<RelayPayload>>(
        &self,
        destination: ShardId,
        payload: P,
    ) -> Result<(), RelayError> {
        let frame = RelayMessage::new(self.shard_id, destination, payload).encode()?;
        self.frames.send(frame)
    }

    fn send_control<P: Into<RelayPayload>>(
        &self,
        destination: ShardId,
        payload: P,
    ) -> Result<bool, RelayError> {
        let payload = payload.into();
        if !self.is_control() {
            tracing::warn!(
                shard_id = self.shard_id,
                kind = %payload.kind(),
                "worker shard cannot send control messages"
            );
            return Ok(false);
        }
        self.send(destination, payload)?;
        Ok(true)
    }

    pub fn send_ban(&self, target_user: UserId, auth_name: &str) -> Result<bool, RelayError> {
        self.send_control(NO_SHARD, BanUser {
            target_user,
            auth_name: auth_name.to_owned(),
        })
    }

    pub fn send_unban(&self, target_user: UserId, auth_name: &str) -> Result<bool, RelayError> {
        self.send_control(NO_SHARD, UnbanUser {
            target_user,
            auth_name: auth_name.to_owned(),
        })
    }

    pub fn send_leave_server(
        &self,
        target_server: ServerId,
        instance: ShardId,
    ) -> Result<bool, RelayError> {
        self.send_control(instance, LeaveServer { target_server })
    }

    pub fn send_reprocess_bans(
        &self,
        target_server: ServerId,
        instance: ShardId,
        num_to_retry: u64,
        handling_cooldown: bool,
    ) -> Result<bool, RelayError> {
        self.send_control(instance, ReprocessBans {
            target_server,
            num_to_retry,
            handling_cooldown,
        })
    }

    pub fn send_reprocess_instance_bans(
        &self,
        instance: ShardId,
        num_to_retry: u64,
    ) -> Result<bool, RelayError> {
        self.send_control(instance, ReprocessInstance { num_to_retry })
    }

    pub fn send_ping(&self, instance: ShardId) -> Result<bool, RelayError> {
        self.send_control(instance, Ping)
    }

    pub fn send_activation_for_servers(&self, target_user: UserId) -> Result<bool, RelayError> {
        self.send_control(NO_SHARD, ProcessActivation { target_user })
    }

    pub fn send_server_activation(
        &self,
        target_user: UserId,
        target_server: ServerId,
        instance: ShardId,
    ) -> Result<bool, RelayError> {
        self.send_control(instance, ProcessServerActivation {
            target_user,
            target_server,
        })
    }

    pub fn send_deactivation(&self, target_user: UserId) -> Result<bool, RelayError> {
        self.send_control(NO_SHARD, ProcessDeactivation { target_user })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;

    fn client(shard_id: ShardId) -> (RelayClient, Connection) {
        let (local, remote) = Connection::pair();
        (RelayClient::from_connection(local, shard_id, 0), remote)
    }

    fn recv_all(connection: &mut Connection) -> Vec<RelayMessage> {
        let mut messages = Vec::new();
        while let Some(frame) = connection.try_recv().unwrap() {
            messages.push(RelayMessage::decode(&frame).unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn hello_is_sent_once() {
        let (mut client, mut remote) = client(3);
        assert!(client.send_hello());
        assert!(!client.send_hello());
        assert_eq!(recv_all(&mut remote), vec![RelayMessage::new(3, NO_SHARD, Hello)]);

        client.disconnect();
        let (mut disconnected, _remote) = self::client(4);
        disconnected.disconnect();
        assert!(!disconnected.send_hello());
    }

    #[tokio::test]
    async fn worker_cannot_send_control_messages() {
        let (worker, mut remote) = client(2);
        assert!(!worker.sender().send_ban(1, "mod").unwrap());
        assert!(!worker.sender().send_leave_server(5, 1).unwrap());
        assert!(!worker.sender().send_ping(1).unwrap());
        assert!(recv_all(&mut remote).is_empty());

        let (control, mut remote) = client(0);
        let sender = control.sender().clone();
        assert!(sender.send_ban(1, "mod").unwrap());
        assert!(sender.send_reprocess_bans(9, 2, 61, true).unwrap());
        assert!(sender.send_server_activation(1, 9, 2).unwrap());
        assert_eq!(recv_all(&mut remote), vec![
            RelayMessage::new(0, NO_SHARD, BanUser {
                target_user: 1,
                auth_name: "mod".to_owned(),
            }),
            RelayMessage::new(0, 2, ReprocessBans {
                target_server: 9,
                num_to_retry: 61,
                handling_cooldown: true,
            }),
            RelayMessage::new(0, 2, ProcessServerActivation {
                target_user: 1,
                target_server: 9,
            }),
        ]);
    }

    #[tokio::test]
    async fn duplicate_handler_is_rejected() {
        let (mut client, _remote) = client(1);
        assert!(client.register(|_: Ping| Ok(())));
        assert!(!client.register(|_: Ping| anyhow::bail!("replaced")));
    }

    #[tokio::test]
    async fn dispatch_rules() {
        let (mut client, remote) = client(1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        client.register({
            let seen = seen.clone();
            move |req: LeaveServer| {
                seen.lock().unwrap().push(req.target_server);
                anyhow::ensure!(req.target_server != 2, "cannot leave");
                Ok(())
            }
        });

        let send = |payload: RelayPayload| {
            remote
                .send(RelayMessage::new(0, 1, payload).encode().unwrap())
                .unwrap();
        };

        // handler errors do not stop the drain
        send(LeaveServer { target_server: 1 }.into());
        send(LeaveServer { target_server: 2 }.into());
        send(LeaveServer { target_server: 3 }.into());
        assert_eq!(client.recv_messages(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        // a message without a handler stops the drain
        send(RelayPayload::Ping);
        send(LeaveServer { target_server: 4 }.into());
        assert_eq!(client.recv_messages(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        // the unhandled ping was discarded, not re-queued
        client.register(|_: Ping| Ok(()));
        assert_eq!(client.recv_messages(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);

        // so does an invalid frame
        remote.send(Bytes::from_static(b"{}")).unwrap();
        send(LeaveServer { target_server: 5 }.into());
        assert_eq!(client.recv_messages(), 0);
        assert_eq!(client.recv_messages(), 1);

        drop(remote);
        assert_eq!(client.recv_messages(), 0);
        assert!(!client.is_connected());
    }
}
