use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind to {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read spooled message")]
    Spool(#[from] io::Error),

    #[error("failed to decode base64 data")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to create folder {path:?}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
