use thiserror::Error;

use crate::address::AddressError;
use crate::codec::DecodeError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error(transparent)]
    MalformedIdentity(#[from] AddressError),

    /// The peer has not created their half of the conversation yet.
    #[error("waiting for the other party to open the conversation")]
    PeerNotReady,

    /// Our own folder is gone although it was provisioned.
    #[error("local conversation folder is missing: {0}")]
    LocalFolderMissing(String),

    #[error("could not write access control for {path}: {source}")]
    AccessWriteFailed { path: String, source: StorageError },

    #[error("could not write {path}: {source}")]
    StorageWriteFailed { path: String, source: StorageError },

    #[error("could not read {path}: {source}")]
    StorageReadFailed { path: String, source: StorageError },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("no user is signed in")]
    NotSignedIn,

    #[error("no conversation is active")]
    NoActivePeer,

    /// A newer switch replaced this operation before it finished.
    #[error("operation superseded by a newer conversation switch")]
    Superseded,

    #[error("profile lookup failed: {0}")]
    Identity(StorageError),
}

impl ChatError {
    /// Conditions that are expected during normal use and should be shown as
    /// an advisory state rather than a failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PeerNotReady | Self::Superseded)
    }
}
