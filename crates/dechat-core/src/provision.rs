//! Lazy creation of conversation folders.
//!
//! `Unknown → Probing → {Exists | Missing}`; a missing folder continues with
//! `Creating → Granting → Ready`. Any failure ends in `Failed` carrying the
//! error. Nothing is retried here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dechat_types::models::WebId;

use crate::acl;
use crate::address;
use crate::error::{ChatError, Result};
use crate::storage::{RemoteStorage, StorageError};

#[derive(Debug, Clone)]
pub enum ProvisionState {
    Unknown,
    Probing,
    Exists,
    Missing,
    Creating,
    Granting,
    Ready,
    Failed(ChatError),
}

impl ProvisionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Probing => "probing",
            Self::Exists => "exists",
            Self::Missing => "missing",
            Self::Creating => "creating",
            Self::Granting => "granting",
            Self::Ready => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

/// Ensures `owner`'s folder for each peer exists and is readable by that peer.
///
/// Calls for the same folder are serialized, so concurrent callers never race
/// each other through create and grant; the later one simply finds a folder
/// that now exists.
#[derive(Clone)]
pub struct FolderProvisioner {
    storage: Arc<dyn RemoteStorage>,
    states: Arc<Mutex<HashMap<String, ProvisionState>>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FolderProvisioner {
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self {
            storage,
            states: Arc::new(Mutex::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Last known state of the folder for `(owner, peer)`.
    pub async fn state(&self, owner: &WebId, peer: &WebId) -> ProvisionState {
        let Ok(folder) = address::resolve_conversation_path(owner, peer) else {
            return ProvisionState::Unknown;
        };
        self.states
            .lock()
            .await
            .get(&folder)
            .cloned()
            .unwrap_or(ProvisionState::Unknown)
    }

    /// Make sure the folder exists. Returns its path once `Ready`.
    pub async fn ensure_folder(&self, owner: &WebId, peer: &WebId) -> Result<String> {
        let folder = address::resolve_conversation_path(owner, peer)?;

        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(folder.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        match self.run(&folder, owner, peer).await {
            Ok(()) => {
                self.transition(&folder, ProvisionState::Ready).await;
                Ok(folder)
            }
            Err(e) => {
                warn!("Provisioning {} failed: {}", folder, e);
                self.transition(&folder, ProvisionState::Failed(e.clone())).await;
                Err(e)
            }
        }
    }

    /// Drop everything known about the folder for `(owner, peer)`, e.g. after
    /// it was deleted. The next `ensure_folder` starts from `Unknown`.
    pub async fn forget(&self, owner: &WebId, peer: &WebId) {
        let Ok(folder) = address::resolve_conversation_path(owner, peer) else {
            return;
        };
        self.locks.lock().await.remove(&folder);
        if self.states.lock().await.remove(&folder).is_some() {
            debug!("{}: forgotten", folder);
        }
    }

    async fn run(&self, folder: &str, owner: &WebId, peer: &WebId) -> Result<()> {
        self.transition(folder, ProvisionState::Probing).await;
        match self.storage.read_folder(folder).await {
            Ok(_) => {
                // access was granted when the folder was created
                self.transition(folder, ProvisionState::Exists).await;
                return Ok(());
            }
            Err(StorageError::NotFound(_)) => {
                self.transition(folder, ProvisionState::Missing).await;
            }
            Err(source) => {
                return Err(ChatError::StorageReadFailed {
                    path: folder.to_string(),
                    source,
                });
            }
        }

        self.transition(folder, ProvisionState::Creating).await;
        self.storage
            .create_folder(folder)
            .await
            .map_err(|source| ChatError::StorageWriteFailed {
                path: folder.to_string(),
                source,
            })?;

        self.transition(folder, ProvisionState::Granting).await;
        acl::grant_read(self.storage.as_ref(), folder, owner, peer).await?;

        info!("Created conversation folder {}", folder);
        Ok(())
    }

    async fn transition(&self, folder: &str, next: ProvisionState) {
        let mut states = self.states.lock().await;
        let previous = states
            .insert(folder.to_string(), next.clone())
            .unwrap_or(ProvisionState::Unknown);
        debug!("{}: {} -> {}", folder, previous.name(), next.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPod;

    fn alice() -> WebId {
        WebId::new("https://alice.pod.example/profile/card#me")
    }

    fn bob() -> WebId {
        WebId::new("https://bob.pod.example/profile/card#me")
    }

    const FOLDER: &str = "https://alice.pod.example/private/dechat/chat_bob/";

    #[tokio::test]
    async fn missing_folder_is_created_and_granted() {
        let pod = MemoryPod::new();
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));

        assert!(matches!(provisioner.state(&alice(), &bob()).await, ProvisionState::Unknown));
        let folder = provisioner.ensure_folder(&alice(), &bob()).await.unwrap();

        assert_eq!(folder, FOLDER);
        assert!(pod.exists(FOLDER).await);
        assert_eq!(pod.write_count(&format!("{FOLDER}.acl")).await, 1);
        assert!(provisioner.state(&alice(), &bob()).await.is_ready());
    }

    #[tokio::test]
    async fn existing_folder_is_not_regranted() {
        let pod = MemoryPod::new();
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));

        provisioner.ensure_folder(&alice(), &bob()).await.unwrap();
        provisioner.ensure_folder(&alice(), &bob()).await.unwrap();

        assert_eq!(pod.write_count(&format!("{FOLDER}.acl")).await, 1);
    }

    #[tokio::test]
    async fn concurrent_calls_grant_once() {
        let pod = MemoryPod::new();
        pod.slow_down(FOLDER, std::time::Duration::from_millis(10)).await;
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));

        let (alice, bob) = (alice(), bob());
        let (a, b) = tokio::join!(
            provisioner.ensure_folder(&alice, &bob),
            provisioner.ensure_folder(&alice, &bob),
        );
        assert_eq!(a.unwrap(), FOLDER);
        assert_eq!(b.unwrap(), FOLDER);

        let acls: Vec<_> = pod
            .files_under(FOLDER)
            .await
            .into_iter()
            .filter(|f| f.ends_with(".acl"))
            .collect();
        assert_eq!(acls.len(), 1);
        assert_eq!(pod.write_count(&acls[0]).await, 1);
        assert!(provisioner.state(&alice, &bob).await.is_ready());
    }

    #[tokio::test]
    async fn failed_grant_is_reported_not_retried() {
        let pod = MemoryPod::new();
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));
        pod.fail_writes_under(&format!("{FOLDER}.acl")).await;

        let err = provisioner.ensure_folder(&alice(), &bob()).await.unwrap_err();
        assert!(matches!(err, ChatError::AccessWriteFailed { .. }));
        assert!(matches!(
            provisioner.state(&alice(), &bob()).await,
            ProvisionState::Failed(ChatError::AccessWriteFailed { .. })
        ));
        assert_eq!(pod.write_count(&format!("{FOLDER}.acl")).await, 0);
    }

    #[tokio::test]
    async fn unreadable_folder_fails_without_creating() {
        let pod = MemoryPod::new();
        pod.fail_reads_under(FOLDER).await;
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));

        let err = provisioner.ensure_folder(&alice(), &bob()).await.unwrap_err();
        assert!(matches!(err, ChatError::StorageReadFailed { .. }));
        assert!(!pod.exists(FOLDER).await);
    }

    #[tokio::test]
    async fn forgotten_folder_is_provisioned_again() {
        let pod = MemoryPod::new();
        let provisioner = FolderProvisioner::new(Arc::new(pod.clone()));

        provisioner.ensure_folder(&alice(), &bob()).await.unwrap();
        pod.delete_folder(FOLDER).await.unwrap();
        provisioner.forget(&alice(), &bob()).await;

        assert!(matches!(provisioner.state(&alice(), &bob()).await, ProvisionState::Unknown));
        assert!(provisioner.locks.lock().await.is_empty());

        provisioner.ensure_folder(&alice(), &bob()).await.unwrap();
        assert!(pod.exists(FOLDER).await);
        assert!(pod.exists(&format!("{FOLDER}.acl")).await);
    }

    #[tokio::test]
    async fn malformed_owner_is_rejected() {
        let provisioner = FolderProvisioner::new(Arc::new(MemoryPod::new()));
        let err = provisioner
            .ensure_folder(&WebId::new("alice"), &bob())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MalformedIdentity(_)));
    }
}
