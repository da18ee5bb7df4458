//! Conversation protocol for two-party chat over Solid pods.
//!
//! Each party keeps its half of a conversation in its own pod, under a folder
//! derived from the peer's WebId, readable by that peer. Loading a
//! conversation merges both halves into one time-ordered log.

pub mod acl;
pub mod address;
pub mod codec;
pub mod error;
pub mod identity;
pub mod memory;
pub mod provision;
pub mod session;
pub mod storage;
pub mod store;
pub mod turtle;

pub use error::{ChatError, Result};
pub use identity::IdentityProvider;
pub use session::ConversationSession;
pub use storage::{RemoteStorage, StorageError};
