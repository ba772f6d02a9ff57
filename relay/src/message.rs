use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

pub type ShardId = i32;
pub type UserId = u64;
pub type ServerId = u64;

/// Sender id of an unregistered peer and destination of broadcasts.
pub const NO_SHARD: ShardId = -1;

/// A single relay frame.
///
/// Encoded as a JSON object:
/// `{"sender": 0, "destination": -1, "payload": {"type": "BanUser", "data": {...}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub sender: ShardId,
    pub destination: ShardId,
    pub payload: RelayPayload,
}

impl RelayMessage {
    pub fn new<P: Into<RelayPayload>>(sender: ShardId, destination: ShardId, payload: P) -> Self {
        Self {
            sender,
            destination,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn kind(&self) -> RelayMessageType {
        self.payload.kind()
    }

    pub fn encode(&self) -> Result<Bytes, RelayError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(RelayError::Encode)
    }

    /// Parses a frame and checks the envelope.
    ///
    /// Fails on malformed JSON, unknown message types, missing payload
    /// fields and shard ids below [`NO_SHARD`].
    pub fn decode(frame: &[u8]) -> Result<Self, RelayError> {
        let message = serde_json::from_slice::<Self>(frame)
            .map_err(|e| RelayError::InvalidMessage(e.to_string()))?;

        if message.sender < NO_SHARD {
            return Err(RelayError::InvalidMessage(format!(
                "sender id out of range: {}",
                message.sender
            )));
        }
        if message.destination < NO_SHARD {
            return Err(RelayError::InvalidMessage(format!(
                "destination id out of range: {}",
                message.destination
            )));
        }

        Ok(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayMessageType {
    Hello,
    Ping,
    BanUser,
    UnbanUser,
    LeaveServer,
    ReprocessBans,
    ReprocessInstance,
    ProcessActivation,
    ProcessServerActivation,
    ProcessDeactivation,
}

impl RelayMessageType {
    /// Broadcast messages are fanned out to every worker shard
    /// regardless of their destination.
    pub const fn is_broadcast(self) -> bool {
        matches!(
            self,
            Self::BanUser | Self::UnbanUser | Self::ProcessActivation | Self::ProcessDeactivation
        )
    }
}

impl std::fmt::Display for RelayMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RelayPayload {
    Hello,
    Ping,
    BanUser(BanUser),
    UnbanUser(UnbanUser),
    LeaveServer(LeaveServer),
    ReprocessBans(ReprocessBans),
    ReprocessInstance(ReprocessInstance),
    ProcessActivation(ProcessActivation),
    ProcessServerActivation(ProcessServerActivation),
    ProcessDeactivation(ProcessDeactivation),
}

impl RelayPayload {
    pub fn kind(&self) -> RelayMessageType {
        match self {
            Self::Hello => RelayMessageType::Hello,
            Self::Ping => RelayMessageType::Ping,
            Self::BanUser(_) => RelayMessageType::BanUser,
            Self::UnbanUser(_) => RelayMessageType::UnbanUser,
            Self::LeaveServer(_) => RelayMessageType::LeaveServer,
            Self::ReprocessBans(_) => RelayMessageType::ReprocessBans,
            Self::ReprocessInstance(_) => RelayMessageType::ReprocessInstance,
            Self::ProcessActivation(_) => RelayMessageType::ProcessActivation,
            Self::ProcessServerActivation(_) => RelayMessageType::ProcessServerActivation,
            Self::ProcessDeactivation(_) => RelayMessageType::ProcessDeactivation,
        }
    }
}

/// A typed relay payload which can be routed to a registered handler.
pub trait RelayRequest: Into<RelayPayload> + Sized + Send + 'static {
    const KIND: RelayMessageType;

    fn from_payload(payload: RelayPayload) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BanUser {
    pub target_user: UserId,
    pub auth_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnbanUser {
    pub target_user: UserId,
    pub auth_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaveServer {
    pub target_server: ServerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReprocessBans {
    pub target_server: ServerId,
    /// Replay only the last N bans, `0` replays the whole list.
    #[serde(default)]
    pub num_to_retry: u64,
    #[serde(default)]
    pub handling_cooldown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReprocessInstance {
    #[serde(default)]
    pub num_to_retry: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessActivation {
    pub target_user: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessServerActivation {
    pub target_user: UserId,
    pub target_server: ServerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessDeactivation {
    pub target_user: UserId,
}

macro_rules! impl_unit_requests {
    ($($ty:ident),*$(,)?) => {$(
        impl From<$ty> for RelayPayload {
            #[inline]
            fn from(_: $ty) -> Self {
                Self::$ty
            }
        }

        impl RelayRequest for $ty {
            const KIND: RelayMessageType = RelayMessageType::$ty;

            fn from_payload(payload: RelayPayload) -> Option<Self> {
                match payload {
                    RelayPayload::$ty => Some($ty),
                    _ => None,
                }
            }
        }
    )*};
}

macro_rules! impl_data_requests {
    ($($ty:ident),*$(,)?) => {$(
        impl From<$ty> for RelayPayload {
            #[inline]
            fn from(data: $ty) -> Self {
                Self::$ty(data)
            }
        }

        impl RelayRequest for $ty {
            const KIND: RelayMessageType = RelayMessageType::$ty;

            fn from_payload(payload: RelayPayload) -> Option<Self> {
                match payload {
                    RelayPayload::$ty(data) => Some(data),
                    _ => None,
                }
            }
        }
    )*};
}

impl_unit_requests![Hello, Ping];

impl_data_requests![
    BanUser,
    UnbanUser,
    LeaveServer,
    ReprocessBans,
    ReprocessInstance,
    ProcessActivation,
    ProcessServerActivation,
    ProcessDeactivation,
];
