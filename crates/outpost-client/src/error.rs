use thiserror::Error;

use outpost_wire::WireError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("not connected to any server")]
    NotConnected,

    #[error("server list is empty")]
    NoServers,
}
