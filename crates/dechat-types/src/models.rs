use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Avatar shown for profiles that do not publish a photo.
pub const DEFAULT_AVATAR: &str = "assets/images/profile.png";

/// A Solid WebId, e.g. `https://alice.pod.example/profile/card#me`.
///
/// Kept as an opaque string here; structural validation happens where a path
/// is derived from it (see `dechat_core::address`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebId(String);

impl WebId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WebId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WebId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WebId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Display fields of a user, refreshed whenever the profile is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub web_id: WebId,
    pub name: String,
    pub photo: String,
}

impl Profile {
    /// Profile with no published fields: the WebId doubles as the name.
    pub fn bare(web_id: WebId) -> Self {
        Self {
            name: web_id.to_string(),
            web_id,
            photo: DEFAULT_AVATAR.to_string(),
        }
    }
}

/// A message exactly as stored in a pod resource, before the sender's
/// display name has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub sender: WebId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// One entry of the merged conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: WebId,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Resource the message was decoded from. `None` while a sent message is
    /// only shown optimistically and has not been read back from storage.
    pub resource: Option<String>,
}
