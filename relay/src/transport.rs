use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytes::Bytes;
use fleetguard_util::futures::JoinTask;
use futures_util::StreamExt;
use futures_util::sink::SinkExt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::RelayError;

pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1 << 20;

/// Port used when unix sockets are not available.
pub const DEFAULT_RELAY_PORT: u16 = 27831;

pub fn make_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    let mut builder = LengthDelimitedCodec::builder();
    builder.max_frame_length(max_frame_length);
    builder.length_field_length(4).big_endian().new_codec()
}

/// Where the relay server listens.
///
/// Text form is `unix:/path/to/socket` or `tcp:PORT` (loopback only).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelayAddress {
    Unix(PathBuf),
    Tcp(u16),
}

impl RelayAddress {
    /// A per-process socket in the temp dir.
    pub fn default_for_process() -> Self {
        if cfg!(unix) {
            let name = format!("fleetguard-relay-{}.sock", std::process::id());
            Self::Unix(std::env::temp_dir().join(name))
        } else {
            Self::Tcp(DEFAULT_RELAY_PORT)
        }
    }
}

impl std::fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(port) => write!(f, "tcp:{port}"),
        }
    }
}

impl FromStr for RelayAddress {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(RelayError::InvalidAddress(s.to_owned()));
            }
            Ok(Self::Unix(PathBuf::from(path)))
        } else if let Some(port) = s.strip_prefix("tcp:") {
            port.parse()
                .map(Self::Tcp)
                .map_err(|_| RelayError::InvalidAddress(s.to_owned()))
        } else {
            Err(RelayError::InvalidAddress(s.to_owned()))
        }
    }
}

impl Serialize for RelayAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RelayAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Cloneable handle to the outgoing half of a [`Connection`].
#[derive(Debug, Clone)]
pub struct FrameSender(mpsc::UnboundedSender<Bytes>);

impl FrameSender {
    pub fn send(&self, frame: Bytes) -> Result<(), RelayError> {
        self.0.send(frame).map_err(|_| RelayError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// A bidirectional, non-blocking stream of relay frames.
///
/// Socket IO runs in background tasks which are aborted with the connection.
pub struct Connection {
    outgoing: FrameSender,
    incoming: mpsc::UnboundedReceiver<Bytes>,
    _io_tasks: Option<(JoinTask<()>, JoinTask<()>)>,
}

impl Connection {
    /// Two connected in-memory endpoints.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();

        let left = Self {
            outgoing: FrameSender(left_tx),
            incoming: left_rx,
            _io_tasks: None,
        };
        let right = Self {
            outgoing: FrameSender(right_tx),
            incoming: right_rx,
            _io_tasks: None,
        };
        (left, right)
    }

    pub async fn connect(
        address: &RelayAddress,
        max_frame_length: usize,
    ) -> Result<Self, RelayError> {
        match address {
            #[cfg(unix)]
            RelayAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Self::from_stream(stream, max_frame_length))
            }
            #[cfg(not(unix))]
            RelayAddress::Unix(_) => Err(RelayError::InvalidAddress(address.to_string())),
            RelayAddress::Tcp(port) => {
                let stream = TcpStream::connect(("127.0.0.1", *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Self::from_stream(stream, max_frame_length))
            }
        }
    }

    pub fn from_stream<S>(stream: S, max_frame_length: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<Bytes>();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Bytes>();

        let mut reader = FramedRead::new(reader, make_codec(max_frame_length));
        let reader_task = JoinTask::new(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(frame) => {
                        if incoming_tx.send(frame.freeze()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("relay read failed: {e}");
                        break;
                    }
                }
            }
        });

        let mut writer = FramedWrite::new(writer, make_codec(max_frame_length));
        let writer_task = JoinTask::new(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!("relay write failed: {e}");
                    break;
                }
            }
        });

        Self {
            outgoing: FrameSender(outgoing_tx),
            incoming,
            _io_tasks: Some((reader_task, writer_task)),
        }
    }

    pub fn sender(&self) -> FrameSender {
        self.outgoing.clone()
    }

    pub fn send(&self, frame: Bytes) -> Result<(), RelayError> {
        self.outgoing.send(frame)
    }

    /// Returns the next received frame without waiting.
    ///
    /// Buffered frames are still returned after the peer disconnects,
    /// the error is reported once the buffer is drained.
    pub fn try_recv(&mut self) -> Result<Option<Bytes>, RelayError> {
        match self.incoming.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(RelayError::ConnectionClosed),
        }
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.incoming.recv().await
    }
}

/// Accepts relay connections in the background.
pub struct RelayListener {
    address: RelayAddress,
    accepted: mpsc::UnboundedReceiver<Connection>,
    _accept_task: JoinTask<()>,
}

impl RelayListener {
    /// Binds to the address. An existing socket file is replaced.
    ///
    /// For `tcp:0` the resulting address holds the assigned port.
    pub async fn bind(
        address: &RelayAddress,
        max_frame_length: usize,
    ) -> Result<Self, RelayError> {
        let (accepted_tx, accepted) = mpsc::unbounded_channel();

        let (address, accept_task) = match address {
            #[cfg(unix)]
            RelayAddress::Unix(path) => {
                remove_socket(path)?;
                let listener = tokio::net::UnixListener::bind(path)?;
                let task = JoinTask::new(async move {
                    loop {
                        let conn = match listener.accept().await {
                            Ok((stream, _)) => Connection::from_stream(stream, max_frame_length),
                            Err(e) => {
                                tracing::error!("failed to accept relay connection: {e}");
                                break;
                            }
                        };
                        if accepted_tx.send(conn).is_err() {
                            break;
                        }
                    }
                });
                (address.clone(), task)
            }
            #[cfg(not(unix))]
            RelayAddress::Unix(_) => return Err(RelayError::InvalidAddress(address.to_string())),
            RelayAddress::Tcp(port) => {
                let listener = TcpListener::bind(("127.0.0.1", *port)).await?;
                let port = listener.local_addr()?.port();
                let task = JoinTask::new(async move {
                    loop {
                        let conn = match listener.accept().await {
                            Ok((stream, _)) => {
                                stream.set_nodelay(true).ok();
                                Connection::from_stream(stream, max_frame_length)
                            }
                            Err(e) => {
                                tracing::error!("failed to accept relay connection: {e}");
                                break;
                            }
                        };
                        if accepted_tx.send(conn).is_err() {
                            break;
                        }
                    }
                });
                (RelayAddress::Tcp(port), task)
            }
        };

        tracing::info!(%address, "relay listener bound");

        Ok(Self {
            address,
            accepted,
            _accept_task: accept_task,
        })
    }

    pub fn address(&self) -> &RelayAddress {
        &self.address
    }

    pub fn try_accept(&mut self) -> Result<Option<Connection>, RelayError> {
        match self.accepted.try_recv() {
            Ok(conn) => Ok(Some(conn)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(RelayError::ListenerClosed),
        }
    }
}

impl Drop for RelayListener {
    fn drop(&mut self) {
        if let RelayAddress::Unix(path) = &self.address {
            if let Err(e) = remove_socket(path) {
                tracing::warn!(path = %path.display(), "failed to remove relay socket: {e}");
            }
        }
    }
}

fn remove_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
