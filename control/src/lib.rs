pub use self::client::ControlClient;
pub use self::error::{ClientError, ClientResult, ServerError, ServerResult};
pub use self::proto::ModeratorInfo;
pub use self::server::{ControlEndpoint, ControlServer, ControlServerConfig};

mod client;
mod error;
mod proto;
mod server;
