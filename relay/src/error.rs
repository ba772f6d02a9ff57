use crate::server::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay connection closed")]
    ConnectionClosed,
    #[error("relay listener closed")]
    ListenerClosed,
    #[error("invalid relay message: {0}")]
    InvalidMessage(String),
    #[error("failed to encode relay message")]
    Encode(#[source] serde_json::Error),
    #[error("invalid relay address: {0}")]
    InvalidAddress(String),
    #[error("registry points to an unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("relay io error")]
    Io(#[from] std::io::Error),
}
