use thiserror::Error;

use outpost_store::StoreError;
use outpost_wire::WireError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}
