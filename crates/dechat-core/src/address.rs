//! Deterministic conversation addressing.
//!
//! Each party stores its half of a conversation under its own pod at
//! `<ownerRoot>/private/dechat/chat_<peerToken>/`, where the peer token is the
//! first host label of the peer's WebId. Paths are recomputed on demand; no
//! registry exists.

use thiserror::Error;
use url::Url;

use dechat_types::models::WebId;

/// Chat root below the owner's pod root.
pub const CHAT_ROOT: &str = "private/dechat/";
/// Prefix of every per-peer conversation folder.
pub const FOLDER_PREFIX: &str = "chat_";
/// Suffix appended to a folder path to address its access descriptor.
pub const ACL_SUFFIX: &str = ".acl";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed identity {identity:?}: {reason}")]
pub struct AddressError {
    pub identity: String,
    pub reason: &'static str,
}

fn parse(identity: &WebId) -> Result<Url, AddressError> {
    let err = |reason| AddressError {
        identity: identity.to_string(),
        reason,
    };
    if !identity.as_str().contains("://") {
        return Err(err("missing scheme delimiter"));
    }
    let url = Url::parse(identity.as_str()).map_err(|_| err("not an absolute URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(err("unsupported scheme"));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(err("missing host")),
    }
}

/// Scheme and authority of a WebId, with a trailing slash:
/// `https://alice.pod.example/profile/card#me` → `https://alice.pod.example/`.
pub fn pod_root(identity: &WebId) -> Result<String, AddressError> {
    let url = parse(identity)?;
    Ok(format!("{}/", url.origin().ascii_serialization()))
}

/// Short, stable token naming the conversation with `peer`.
pub fn peer_token(peer: &WebId) -> Result<String, AddressError> {
    let url = parse(peer)?;
    // IPv6 literals are flattened so the token stays a single path segment
    let host = url.host_str().unwrap_or_default();
    let label = host.split('.').next().unwrap_or(host);
    Ok(label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect())
}

/// `<ownerRoot>/private/dechat/`.
pub fn chat_root(owner: &WebId) -> Result<String, AddressError> {
    Ok(format!("{}{}", pod_root(owner)?, CHAT_ROOT))
}

/// Folder in `owner`'s pod holding `owner`'s messages to `peer`.
///
/// Not symmetric: swapping the arguments yields the peer's folder, which
/// lives in the peer's pod.
pub fn resolve_conversation_path(owner: &WebId, peer: &WebId) -> Result<String, AddressError> {
    Ok(format!(
        "{}{}{}/",
        chat_root(owner)?,
        FOLDER_PREFIX,
        peer_token(peer)?
    ))
}

/// Both directed folders of a conversation, as seen from `me`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPaths {
    /// Our folder, in our pod.
    pub own: String,
    /// The peer's folder, in the peer's pod.
    pub peer: String,
}

impl ConversationPaths {
    pub fn resolve(me: &WebId, peer: &WebId) -> Result<Self, AddressError> {
        Ok(Self {
            own: resolve_conversation_path(me, peer)?,
            peer: resolve_conversation_path(peer, me)?,
        })
    }
}

/// Access descriptor of a folder.
pub fn acl_resource(folder: &str) -> String {
    format!("{folder}{ACL_SUFFIX}")
}

/// Resource for a single message inside a folder.
pub fn message_resource(folder: &str, id: &str) -> String {
    if folder.ends_with('/') {
        format!("{folder}{id}.ttl")
    } else {
        format!("{folder}/{id}.ttl")
    }
}
