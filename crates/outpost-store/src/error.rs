use std::path::PathBuf;

use thiserror::Error;

/// Errors the store can surface. Per specification §7, these are fatal to
/// the requesting command but never to the replica process: callers map
/// them to a generic "failed" reply and keep serving other requests.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
