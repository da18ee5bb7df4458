//! Message store and merge engine.
//!
//! Remote storage is authoritative. The published log is a derived cache that
//! is rebuilt by every full load and swapped in as one snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dechat_types::models::{Message, RawMessage, WebId};
use dechat_types::snapshot::{LogSnapshot, LogStatus};

use crate::address::{self, ACL_SUFFIX};
use crate::codec;
use crate::error::{ChatError, Result};
use crate::identity::{self, IdentityProvider};
use crate::storage::{RemoteStorage, StorageError};

/// Loads, merges and publishes the two halves of a conversation.
pub struct MessageStore {
    storage: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    log: watch::Sender<LogSnapshot>,
}

impl MessageStore {
    pub fn new(storage: Arc<dyn RemoteStorage>, identity: Arc<dyn IdentityProvider>) -> Self {
        let (log, _) = watch::channel(LogSnapshot::idle());
        Self {
            storage,
            identity,
            log,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LogSnapshot> {
        self.log.subscribe()
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.log.borrow().clone()
    }

    // -- Publishing --

    /// Start a new generation for `peer` with an empty, loading log.
    /// Anything still tagged with an older generation is discarded from now on.
    pub fn begin(&self, generation: u64, peer: WebId) {
        self.log.send_replace(LogSnapshot {
            generation,
            peer: Some(peer),
            status: LogStatus::Loading,
            messages: Arc::from(Vec::new()),
        });
    }

    /// Start a new generation with no conversation selected.
    pub fn deactivate(&self, generation: u64) {
        self.log.send_replace(LogSnapshot {
            generation,
            ..LogSnapshot::idle()
        });
    }

    /// Clear the log of `generation` and record why.
    pub fn fail(&self, generation: u64, err: &ChatError) -> bool {
        self.publish(generation, LogStatus::Failed(err.to_string()), Vec::new())
    }

    /// Show a message before storage has confirmed it. The next load replaces
    /// it with whatever storage actually holds.
    pub fn push_optimistic(&self, generation: u64, message: Message) -> bool {
        self.log.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            let mut messages = snapshot.messages.to_vec();
            messages.push(message);
            snapshot.messages = Arc::from(messages);
            true
        })
    }

    fn publish(&self, generation: u64, status: LogStatus, messages: Vec<Message>) -> bool {
        self.log.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            snapshot.status = status;
            snapshot.messages = Arc::from(messages);
            true
        })
    }

    // -- Loading --

    /// Load both folders and publish the merged log, unless `generation` has
    /// been superseded in the meantime. Returns the number of messages.
    ///
    /// When either folder cannot be listed the published log is emptied; it
    /// is never filled from one side only.
    pub async fn load_conversation(
        &self,
        generation: u64,
        owner_folder: &str,
        peer_folder: &str,
    ) -> Result<usize> {
        match self.fetch_conversation(owner_folder, peer_folder).await {
            Ok(messages) => {
                let count = messages.len();
                if !self.publish(generation, LogStatus::Ready, messages) {
                    debug!("Dropping stale load of generation {}", generation);
                    return Err(ChatError::Superseded);
                }
                info!("Loaded {} messages (generation {})", count, generation);
                Ok(count)
            }
            Err(e) => {
                let status = match &e {
                    ChatError::PeerNotReady => LogStatus::WaitingForPeer,
                    other => LogStatus::Failed(other.to_string()),
                };
                if !self.publish(generation, status, Vec::new()) {
                    return Err(ChatError::Superseded);
                }
                Err(e)
            }
        }
    }

    /// Read and merge both halves without publishing anything.
    ///
    /// Owner messages come first, then the peer's, each side in listing
    /// order; the stable sort by send time keeps that order among equal
    /// timestamps.
    pub async fn fetch_conversation(
        &self,
        owner_folder: &str,
        peer_folder: &str,
    ) -> Result<Vec<Message>> {
        let peer_entries = self.list(peer_folder).await.map_err(|e| {
            debug!("Peer folder {} not listable: {}", peer_folder, e);
            ChatError::PeerNotReady
        })?;
        let owner_entries = self.list(owner_folder).await.map_err(|e| {
            error!("Own folder {} not listable: {}", owner_folder, e);
            ChatError::LocalFolderMissing(owner_folder.to_string())
        })?;

        let fetches = owner_entries
            .iter()
            .chain(peer_entries.iter())
            .map(|resource| self.fetch(resource));
        let raws: Vec<(String, RawMessage)> = join_all(fetches).await.into_iter().flatten().collect();

        let names = self.display_names(raws.iter().map(|(_, raw)| &raw.sender)).await;
        let mut messages: Vec<Message> = raws
            .into_iter()
            .map(|(resource, raw)| Message {
                sender_name: names
                    .get(&raw.sender)
                    .cloned()
                    .unwrap_or_else(|| raw.sender.to_string()),
                sender: raw.sender,
                text: raw.text,
                sent_at: raw.sent_at,
                resource: Some(resource),
            })
            .collect();
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }

    /// Message resources directly inside `folder`, sorted.
    async fn list(&self, folder: &str) -> std::result::Result<Vec<String>, StorageError> {
        let mut entries: Vec<String> = self
            .storage
            .read_folder(folder)
            .await?
            .into_iter()
            .filter(|entry| is_message_entry(entry))
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn fetch(&self, resource: &str) -> Option<(String, RawMessage)> {
        let body = match self.storage.read_file(resource).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Skipping unreadable message {}: {}", resource, e);
                return None;
            }
        };
        match codec::decode(&body, resource) {
            Ok(raw) => Some((resource.to_string(), raw)),
            Err(e) => {
                warn!("Skipping undecodable message {}: {}", resource, e);
                None
            }
        }
    }

    // -- Names --

    /// Display name published in `who`'s profile, or the WebId itself.
    pub async fn display_name(&self, who: &WebId) -> String {
        match self.identity.friend_field(who, identity::FN).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => who.to_string(),
            Err(e) => {
                debug!("No profile name for {}: {}", who, e);
                who.to_string()
            }
        }
    }

    /// One lookup per distinct sender.
    async fn display_names<'a>(
        &self,
        senders: impl Iterator<Item = &'a WebId>,
    ) -> HashMap<WebId, String> {
        let mut names = HashMap::new();
        for sender in senders {
            if names.contains_key(sender) {
                continue;
            }
            let name = self.display_name(sender).await;
            names.insert(sender.clone(), name);
        }
        names
    }

    // -- Writing --

    /// Write `message` as a new resource in our own folder. The published log
    /// is left alone; callers reload to observe the write.
    pub async fn append(&self, message: &RawMessage, owner_folder: &str) -> Result<String> {
        let resource = address::message_resource(owner_folder, &Uuid::new_v4().to_string());
        let body = codec::encode(message);
        self.storage
            .create_file(&resource, &body)
            .await
            .map_err(|source| {
                error!("Writing message {} failed: {}", resource, source);
                ChatError::StorageWriteFailed {
                    path: resource.clone(),
                    source,
                }
            })?;
        info!("Wrote message {}", resource);
        Ok(resource)
    }
}

/// Skips sub-containers, access descriptors and other dot-files.
fn is_message_entry(entry: &str) -> bool {
    if entry.ends_with('/') {
        return false;
    }
    let name = entry.rsplit('/').next().unwrap_or(entry);
    !name.is_empty() && !name.starts_with('.') && !name.ends_with(ACL_SUFFIX)
}
