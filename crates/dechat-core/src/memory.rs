//! In-memory collaborators.
//!
//! `MemoryPod` stands in for any number of pods at once (paths are absolute
//! URLs) and `MemoryDirectory` for the profile documents of their owners.
//! Both support failure injection so error paths can be exercised without a
//! network.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use dechat_types::models::WebId;

use crate::identity::IdentityProvider;
use crate::storage::{RemoteStorage, StorageError};

#[derive(Default)]
struct PodState {
    folders: BTreeSet<String>,
    files: BTreeMap<String, String>,
    write_counts: HashMap<String, usize>,
    failing_reads: Vec<String>,
    failing_writes: Vec<String>,
    latency: Vec<(String, Duration)>,
}

impl PodState {
    fn read_blocked(&self, path: &str) -> bool {
        self.failing_reads.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn write_blocked(&self, path: &str) -> bool {
        self.failing_writes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Create every folder between the pod root and `path`'s parent.
    fn create_parents(&mut self, path: &str) {
        let start = path.find("://").map_or(0, |i| i + 3);
        for (i, c) in path.char_indices() {
            if i >= start && c == '/' && i + 1 < path.len() {
                self.folders.insert(path[..=i].to_string());
            }
        }
    }

    fn record_write(&mut self, path: &str) {
        *self.write_counts.entry(path.to_string()).or_default() += 1;
    }
}

fn is_direct_child(parent: &str, candidate: &str) -> bool {
    match candidate.strip_prefix(parent) {
        Some(rest) if !rest.is_empty() => !rest.trim_end_matches('/').contains('/'),
        _ => false,
    }
}

/// Shared in-memory storage for one or more pods.
#[derive(Clone, Default)]
pub struct MemoryPod {
    inner: Arc<Mutex<PodState>>,
}

impl MemoryPod {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads of anything under `prefix` fail with `Forbidden`.
    pub async fn fail_reads_under(&self, prefix: &str) {
        self.inner.lock().await.failing_reads.push(prefix.to_string());
    }

    /// Writes and deletes of anything under `prefix` fail with `Forbidden`.
    pub async fn fail_writes_under(&self, prefix: &str) {
        self.inner.lock().await.failing_writes.push(prefix.to_string());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.inner.lock().await;
        state.failing_reads.clear();
        state.failing_writes.clear();
    }

    /// Delay every operation under `prefix` by `delay`.
    pub async fn slow_down(&self, prefix: &str, delay: Duration) {
        self.inner.lock().await.latency.push((prefix.to_string(), delay));
    }

    /// Number of times `path` has been written.
    pub async fn write_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .await
            .write_counts
            .get(path)
            .copied()
            .unwrap_or_default()
    }

    pub async fn exists(&self, path: &str) -> bool {
        let state = self.inner.lock().await;
        state.folders.contains(path) || state.files.contains_key(path)
    }

    /// Every file below `prefix`, at any depth.
    pub async fn files_under(&self, prefix: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    async fn delay(&self, path: &str) {
        let delay = {
            let state = self.inner.lock().await;
            state
                .latency
                .iter()
                .filter(|(p, _)| path.starts_with(p.as_str()))
                .map(|(_, d)| *d)
                .max()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteStorage for MemoryPod {
    async fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        self.delay(path).await;
        let mut state = self.inner.lock().await;
        if state.write_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        state.create_parents(path);
        state.folders.insert(path.to_string());
        Ok(())
    }

    async fn create_file(&self, path: &str, body: &str) -> Result<(), StorageError> {
        self.delay(path).await;
        let mut state = self.inner.lock().await;
        if state.write_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        if state.files.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        state.create_parents(path);
        state.files.insert(path.to_string(), body.to_string());
        state.record_write(path);
        Ok(())
    }

    async fn read_folder(&self, path: &str) -> Result<Vec<String>, StorageError> {
        self.delay(path).await;
        let state = self.inner.lock().await;
        if state.read_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        if !state.folders.contains(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let folders = state.folders.iter().filter(|f| is_direct_child(path, f));
        let files = state.files.keys().filter(|f| is_direct_child(path, f));
        Ok(folders.chain(files).cloned().collect())
    }

    async fn read_file(&self, path: &str) -> Result<String, StorageError> {
        self.delay(path).await;
        let state = self.inner.lock().await;
        if state.read_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn update_file(&self, path: &str, body: &str) -> Result<(), StorageError> {
        self.delay(path).await;
        let mut state = self.inner.lock().await;
        if state.write_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        state.create_parents(path);
        state.files.insert(path.to_string(), body.to_string());
        state.record_write(path);
        Ok(())
    }

    async fn delete_folder(&self, path: &str) -> Result<(), StorageError> {
        self.delay(path).await;
        let mut state = self.inner.lock().await;
        if state.write_blocked(path) {
            return Err(StorageError::Forbidden(path.to_string()));
        }
        state.folders.retain(|f| !f.starts_with(path));
        state.files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }
}

// -- Profiles --

#[derive(Default)]
struct ProfileRecord {
    fields: HashMap<String, String>,
    friends: Vec<WebId>,
}

/// Profile documents of every known user.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<HashMap<WebId, ProfileRecord>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a profile with the given display name.
    pub async fn register(&self, web_id: &WebId, name: &str) {
        let mut profiles = self.inner.lock().await;
        let record = profiles.entry(web_id.clone()).or_default();
        record.fields.insert(crate::identity::FN.to_string(), name.to_string());
    }

    pub async fn set_field(&self, web_id: &WebId, predicate: &str, value: &str) {
        let mut profiles = self.inner.lock().await;
        let record = profiles.entry(web_id.clone()).or_default();
        record.fields.insert(predicate.to_string(), value.to_string());
    }

    /// Identity provider signed in as `web_id`.
    pub fn sign_in(&self, web_id: &WebId) -> MemoryIdentity {
        MemoryIdentity {
            directory: self.clone(),
            me: Some(web_id.clone()),
        }
    }

    pub fn signed_out(&self) -> MemoryIdentity {
        MemoryIdentity {
            directory: self.clone(),
            me: None,
        }
    }
}

/// `IdentityProvider` over a `MemoryDirectory`.
#[derive(Clone)]
pub struct MemoryIdentity {
    directory: MemoryDirectory,
    me: Option<WebId>,
}

impl MemoryIdentity {
    fn me(&self) -> Result<&WebId, StorageError> {
        self.me
            .as_ref()
            .ok_or_else(|| StorageError::Unauthorized("profile".to_string()))
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn session(&self) -> Option<WebId> {
        self.me.clone()
    }

    async fn profile_field(&self, predicate: &str) -> Result<Option<String>, StorageError> {
        let me = self.me()?.clone();
        self.friend_field(&me, predicate).await
    }

    async fn friends(&self) -> Result<Vec<WebId>, StorageError> {
        let me = self.me()?;
        let profiles = self.directory.inner.lock().await;
        Ok(profiles.get(me).map(|r| r.friends.clone()).unwrap_or_default())
    }

    async fn add_friend(&self, peer: &WebId) -> Result<(), StorageError> {
        let me = self.me()?;
        let mut profiles = self.directory.inner.lock().await;
        let record = profiles.entry(me.clone()).or_default();
        if !record.friends.contains(peer) {
            record.friends.push(peer.clone());
        }
        Ok(())
    }

    async fn remove_friend(&self, peer: &WebId) -> Result<(), StorageError> {
        let me = self.me()?;
        let mut profiles = self.directory.inner.lock().await;
        if let Some(record) = profiles.get_mut(me) {
            record.friends.retain(|f| f != peer);
        }
        Ok(())
    }

    async fn friend_field(
        &self,
        peer: &WebId,
        predicate: &str,
    ) -> Result<Option<String>, StorageError> {
        let profiles = self.directory.inner.lock().await;
        let record = profiles
            .get(peer)
            .ok_or_else(|| StorageError::NotFound(peer.to_string()))?;
        Ok(record.fields.get(predicate).cloned())
    }
}
