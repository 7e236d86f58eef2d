use std::io;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// type alias for all operations on a [`KvStore`] and the server components that could fail
/// with a [`KvsError`]
///
/// [`KvStore`]: ./struct.KvStore.html
pub type Result<T> = std::result::Result<T, KvsError>;

/// The Error variants used by the store, the wire protocol and the server.
#[derive(Error, Debug)]
pub enum KvsError {
    /// the key is in neither the in-memory cache nor the backend
    #[error("key not found: {0}")]
    NotFound(String),

    /// a request could not be decoded from the wire
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),

    /// socket or (non fatal) backend read failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// a backend write or delete failed, so memory and disk may have diverged.
    /// The store refuses all further operations once this has been returned.
    #[error("backend write failed for key {key:?}, cache and disk are no longer consistent: {source}")]
    BackendFatal {
        /// the key whose write-back failed
        key: String,
        /// the underlying I/O failure
        source: io::Error,
    },

    /// error message received from a remote peer or raised while building a component
    #[error("{0}")]
    StringErr(String),
}

impl KvsError {
    /// returns `true` if this error means the store can no longer guarantee that its in-memory
    /// state matches the backend
    pub fn is_fatal(&self) -> bool {
        matches!(self, KvsError::BackendFatal { .. })
    }
}
