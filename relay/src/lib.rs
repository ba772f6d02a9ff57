pub use self::client::{RelayClient, RelaySender};
pub use self::config::RelayConfig;
pub use self::error::RelayError;
pub use self::message::{
    NO_SHARD, RelayMessage, RelayMessageType, RelayPayload, RelayRequest, ServerId, ShardId,
    UserId,
};
pub use self::server::{ConnectionId, RelayServer};
pub use self::supervisor::ProcessSupervisor;
pub use self::transport::{
    Connection, DEFAULT_MAX_FRAME_LENGTH, FrameSender, RelayAddress, RelayListener, make_codec,
};

pub mod message;

mod client;
mod config;
mod error;
mod server;
mod supervisor;
mod transport;
