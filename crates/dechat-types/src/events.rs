use serde::{Deserialize, Serialize};

use crate::models::WebId;

/// Notifications published by a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// The session now targets a different peer
    PeerSwitched { peer: WebId, generation: u64 },

    /// Our half of the conversation exists and carries its access descriptor
    FolderReady { peer: WebId, folder: String },

    /// A full load replaced the published log
    LogReloaded { peer: WebId, generation: u64, messages: usize },

    /// The peer has not provisioned their half yet
    WaitingForPeer { peer: WebId },

    /// A message resource was written to our own folder
    MessageSent { peer: WebId, resource: String },

    /// A friend relationship was added
    PeerAdded { peer: WebId },

    /// A friend relationship was removed and our folder for it deleted
    PeerRemoved { peer: WebId },

    /// An operation failed; `error` is the rendered error
    Failed { peer: Option<WebId>, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_type_and_data() {
        let event = SessionEvent::WaitingForPeer {
            peer: WebId::new("https://bob.pod.example/profile/card#me"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "WaitingForPeer");
        assert_eq!(json["data"]["peer"], "https://bob.pod.example/profile/card#me");
    }
}
