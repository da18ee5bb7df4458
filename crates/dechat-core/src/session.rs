//! The conversation session: who we are, who we talk to, and the published
//! log for that conversation.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use futures_util::future::join_all;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dechat_types::events::SessionEvent;
use dechat_types::models::{DEFAULT_AVATAR, Message, Profile, RawMessage, WebId};
use dechat_types::snapshot::LogSnapshot;

use crate::address::{self, ConversationPaths};
use crate::error::{ChatError, Result};
use crate::identity::{self, IdentityProvider};
use crate::provision::{FolderProvisioner, ProvisionState};
use crate::storage::RemoteStorage;
use crate::store::MessageStore;

/// Handle to a chat session. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    storage: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    provisioner: FolderProvisioner,
    store: MessageStore,

    /// Notifications for every observer of the session
    events: broadcast::Sender<SessionEvent>,

    /// Friends with resolved display fields
    friends: watch::Sender<Vec<Profile>>,

    state: Mutex<SessionState>,
}

struct SessionState {
    owner: Option<WebId>,
    profile: Option<Profile>,
    active: bool,
    peer: Option<WebId>,
    generation: u64,
    /// Cancels whatever the current generation still has in flight
    cancel: CancellationToken,
}

/// Work tagged with the generation it was started for.
struct Turn {
    generation: u64,
    cancel: CancellationToken,
    owner: WebId,
    peer: WebId,
    paths: ConversationPaths,
}

impl ConversationSession {
    pub fn new(storage: Arc<dyn RemoteStorage>, identity: Arc<dyn IdentityProvider>) -> Self {
        let (events, _) = broadcast::channel(256);
        let (friends, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(SessionInner {
                provisioner: FolderProvisioner::new(storage.clone()),
                store: MessageStore::new(storage.clone(), identity.clone()),
                storage,
                identity,
                events,
                friends,
                state: Mutex::new(SessionState {
                    owner: None,
                    profile: None,
                    active: false,
                    peer: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                }),
            }),
        }
    }

    // -- Observation --

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_log(&self) -> watch::Receiver<LogSnapshot> {
        self.inner.store.subscribe()
    }

    pub fn subscribe_friends(&self) -> watch::Receiver<Vec<Profile>> {
        self.inner.friends.subscribe()
    }

    /// The currently published log.
    pub fn snapshot(&self) -> LogSnapshot {
        self.inner.store.snapshot()
    }

    /// Last loaded friend list.
    pub fn friends(&self) -> Vec<Profile> {
        self.inner.friends.borrow().clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    pub async fn active_peer(&self) -> Option<WebId> {
        self.inner.state.lock().await.peer.clone()
    }

    /// Provisioning state of our folder for `peer`.
    pub async fn folder_state(&self, peer: &WebId) -> Result<ProvisionState> {
        let owner = self.owner().await?;
        Ok(self.inner.provisioner.state(&owner, peer).await)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn emit_failure(&self, peer: Option<&WebId>, err: &ChatError) {
        self.emit(SessionEvent::Failed {
            peer: peer.cloned(),
            error: err.to_string(),
        });
    }

    // -- Identity --

    /// WebId of the signed-in user, asked once and remembered.
    pub async fn owner(&self) -> Result<WebId> {
        if let Some(owner) = self.inner.state.lock().await.owner.clone() {
            return Ok(owner);
        }
        let owner = self
            .inner
            .identity
            .session()
            .await
            .ok_or(ChatError::NotSignedIn)?;
        address::pod_root(&owner)?;
        self.inner.state.lock().await.owner = Some(owner.clone());
        Ok(owner)
    }

    /// Fetch our own name and photo.
    pub async fn load_profile(&self) -> Result<Profile> {
        let owner = self.owner().await?;
        let name = self
            .inner
            .identity
            .profile_field(identity::FN)
            .await
            .map_err(ChatError::Identity)?;
        let photo = self
            .inner
            .identity
            .profile_field(identity::HAS_PHOTO)
            .await
            .map_err(ChatError::Identity)?;

        let profile = Profile {
            name: name.unwrap_or_else(|| owner.to_string()),
            photo: photo.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            web_id: owner,
        };
        self.inner.state.lock().await.profile = Some(profile.clone());
        Ok(profile)
    }

    /// Fetch the friend list and each friend's display fields, then publish it.
    /// A friend whose profile cannot be read is listed under their WebId.
    pub async fn load_friends(&self) -> Result<Vec<Profile>> {
        let ids = self
            .inner
            .identity
            .friends()
            .await
            .map_err(ChatError::Identity)?;

        let profiles = join_all(ids.into_iter().map(|id| self.friend_profile(id))).await;
        debug!("Loaded {} friends", profiles.len());
        self.inner.friends.send_replace(profiles.clone());
        Ok(profiles)
    }

    async fn friend_profile(&self, id: WebId) -> Profile {
        let provider = &self.inner.identity;
        let (name, photo) = tokio::join!(
            provider.friend_field(&id, identity::FN),
            provider.friend_field(&id, identity::HAS_PHOTO),
        );
        let mut profile = Profile::bare(id);
        match name {
            Ok(Some(name)) => profile.name = name,
            Ok(None) => {}
            Err(e) => warn!("Could not read profile of {}: {}", profile.web_id, e),
        }
        if let Ok(Some(photo)) = photo {
            profile.photo = photo;
        }
        profile
    }

    async fn own_name(&self, owner: &WebId) -> String {
        let cached = self
            .inner
            .state
            .lock()
            .await
            .profile
            .as_ref()
            .map(|p| p.name.clone());
        match cached {
            Some(name) => name,
            None => self.inner.store.display_name(owner).await,
        }
    }

    // -- Conversation --

    /// Make `peer` the active conversation: provision our folder, then load
    /// both halves. Returns the number of messages loaded.
    ///
    /// Any switch still in flight is superseded and returns
    /// `ChatError::Superseded` without publishing. A failed provisioning keeps
    /// the session active on `peer` with an empty log.
    pub async fn switch_to(&self, peer: &WebId) -> Result<usize> {
        let owner = self.owner().await?;
        let paths = ConversationPaths::resolve(&owner, peer)?;

        let turn = {
            let mut state = self.inner.state.lock().await;
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.generation += 1;
            state.active = true;
            state.peer = Some(peer.clone());
            self.inner.store.begin(state.generation, peer.clone());
            Turn {
                generation: state.generation,
                cancel: state.cancel.clone(),
                owner,
                peer: peer.clone(),
                paths,
            }
        };
        info!("Switched to {} (generation {})", peer, turn.generation);
        self.emit(SessionEvent::PeerSwitched {
            peer: peer.clone(),
            generation: turn.generation,
        });

        // Provisioning always runs to completion; cutting it short could
        // leave a folder without its access descriptor.
        let provisioned = self
            .inner
            .provisioner
            .ensure_folder(&turn.owner, &turn.peer)
            .await;
        if turn.cancel.is_cancelled() {
            debug!("Switch to {} superseded during provisioning", peer);
            return Err(ChatError::Superseded);
        }
        match provisioned {
            Ok(folder) => self.emit(SessionEvent::FolderReady {
                peer: peer.clone(),
                folder,
            }),
            Err(e) => {
                error!("Could not prepare conversation with {}: {}", peer, e);
                self.inner.store.fail(turn.generation, &e);
                self.emit_failure(Some(peer), &e);
                return Err(e);
            }
        }

        self.load(&turn).await
    }

    /// Reload the active conversation from storage.
    pub async fn refresh(&self) -> Result<usize> {
        let turn = self.current_turn().await?.ok_or(ChatError::NoActivePeer)?;
        self.load(&turn).await
    }

    /// Send `text` to the active peer. Blank text or no active peer is a
    /// no-op and returns `Ok(None)`; otherwise returns the written resource.
    ///
    /// The message is shown right away and then reconciled by a full reload,
    /// whether or not the write succeeded.
    pub async fn send(&self, text: &str) -> Result<Option<String>> {
        if text.trim().is_empty() {
            debug!("Ignoring empty message");
            return Ok(None);
        }
        let Some(turn) = self.current_turn().await? else {
            debug!("Ignoring message sent with no active conversation");
            return Ok(None);
        };

        let raw = RawMessage {
            sender: turn.owner.clone(),
            text: text.to_string(),
            sent_at: Utc::now().trunc_subsecs(3),
        };
        let shown = Message {
            sender: raw.sender.clone(),
            sender_name: self.own_name(&turn.owner).await,
            text: raw.text.clone(),
            sent_at: raw.sent_at,
            resource: None,
        };
        self.inner.store.push_optimistic(turn.generation, shown);

        let written = self.inner.store.append(&raw, &turn.paths.own).await;
        if let Ok(resource) = &written {
            self.emit(SessionEvent::MessageSent {
                peer: turn.peer.clone(),
                resource: resource.clone(),
            });
        }

        match self.load(&turn).await {
            Ok(_) | Err(ChatError::PeerNotReady) | Err(ChatError::Superseded) => {}
            Err(e) => warn!("Reload after send failed: {}", e),
        }

        match written {
            Ok(resource) => Ok(Some(resource)),
            Err(e) => {
                self.emit_failure(Some(&turn.peer), &e);
                Err(e)
            }
        }
    }

    /// Snapshot of the active conversation, or `None` when inactive.
    async fn current_turn(&self) -> Result<Option<Turn>> {
        let (generation, cancel, peer) = {
            let state = self.inner.state.lock().await;
            match (&state.peer, state.active) {
                (Some(peer), true) => (state.generation, state.cancel.clone(), peer.clone()),
                _ => return Ok(None),
            }
        };
        let owner = self.owner().await?;
        let paths = ConversationPaths::resolve(&owner, &peer)?;
        Ok(Some(Turn {
            generation,
            cancel,
            owner,
            peer,
            paths,
        }))
    }

    async fn load(&self, turn: &Turn) -> Result<usize> {
        let result = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => Err(ChatError::Superseded),
            result = self.inner.store.load_conversation(
                turn.generation,
                &turn.paths.own,
                &turn.paths.peer,
            ) => result,
        };

        match &result {
            Ok(count) => self.emit(SessionEvent::LogReloaded {
                peer: turn.peer.clone(),
                generation: turn.generation,
                messages: *count,
            }),
            Err(ChatError::PeerNotReady) => {
                info!("Waiting for {} to open the conversation", turn.peer);
                self.emit(SessionEvent::WaitingForPeer {
                    peer: turn.peer.clone(),
                });
            }
            Err(ChatError::Superseded) => {
                debug!("Load of generation {} superseded", turn.generation);
            }
            Err(e) => self.emit_failure(Some(&turn.peer), e),
        }
        result
    }

    // -- Friends --

    /// Add `peer` as a friend.
    pub async fn add_peer(&self, peer: &WebId) -> Result<()> {
        address::peer_token(peer)?;
        self.inner
            .identity
            .add_friend(peer)
            .await
            .map_err(ChatError::Identity)?;
        info!("Added friend {}", peer);
        self.emit(SessionEvent::PeerAdded { peer: peer.clone() });
        self.reload_friends().await;
        Ok(())
    }

    /// Remove `peer` as a friend and delete our half of the conversation with
    /// them. The deletion cannot be undone. Other conversations are untouched.
    pub async fn remove_peer(&self, peer: &WebId) -> Result<()> {
        let owner = self.owner().await?;
        let folder = address::resolve_conversation_path(&owner, peer)?;

        self.inner
            .identity
            .remove_friend(peer)
            .await
            .map_err(ChatError::Identity)?;

        {
            let mut state = self.inner.state.lock().await;
            if state.peer.as_ref() == Some(peer) {
                state.cancel.cancel();
                state.cancel = CancellationToken::new();
                state.generation += 1;
                state.active = false;
                state.peer = None;
                self.inner.store.deactivate(state.generation);
            }
        }

        let deleted = self.inner.storage.delete_folder(&folder).await;
        if let Err(source) = deleted {
            let err = ChatError::StorageWriteFailed {
                path: folder,
                source,
            };
            error!("Could not delete conversation with {}: {}", peer, err);
            self.emit_failure(Some(peer), &err);
            return Err(err);
        }

        self.inner.provisioner.forget(&owner, peer).await;
        info!("Removed friend {} and deleted {}", peer, folder);
        self.emit(SessionEvent::PeerRemoved { peer: peer.clone() });
        self.reload_friends().await;
        Ok(())
    }

    async fn reload_friends(&self) {
        if let Err(e) = self.load_friends().await {
            warn!("Could not reload friends: {}", e);
        }
    }
}
