use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{Message, WebId};

/// What the published log currently represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail")]
pub enum LogStatus {
    /// No conversation selected
    Idle,
    /// A switch is provisioning or loading
    Loading,
    /// The log is the merged content of both folders
    Ready,
    /// The peer's folder could not be listed; the log is empty
    WaitingForPeer,
    /// The last switch or load failed; the log is empty
    Failed(String),
}

/// Immutable view of a conversation handed to observers.
///
/// A snapshot is replaced as a whole, so a reader never sees a partially
/// merged log.
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    pub generation: u64,
    pub peer: Option<WebId>,
    pub status: LogStatus,
    pub messages: Arc<[Message]>,
}

impl LogSnapshot {
    pub fn idle() -> Self {
        Self {
            generation: 0,
            peer: None,
            status: LogStatus::Idle,
            messages: Arc::from(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for LogSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
