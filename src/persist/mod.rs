mod codec;
mod persister;
mod snapshotter;

pub use persister::PersistedState;
pub use persister::Persister;
pub use snapshotter::Snapshotter;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("failed to decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("checksum mismatch in {0:?}")]
    ChecksumMismatch(PathBuf),
    #[error("file {0:?} is too short to hold a checksum")]
    Truncated(PathBuf),
}
