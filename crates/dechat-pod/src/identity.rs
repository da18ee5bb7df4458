//! `IdentityProvider` backed by WebId profile documents.

use async_trait::async_trait;
use tracing::info;
use url::Url;

use dechat_core::identity::IdentityProvider;
use dechat_core::storage::StorageError;
use dechat_core::turtle::{Graph, Term};
use dechat_types::models::WebId;

use crate::client::SolidPod;

pub const VCARD: &str = "http://www.w3.org/2006/vcard/ns#";
pub const FOAF: &str = "http://xmlns.com/foaf/0.1/";

/// Profiles are read fresh on every call; nothing is cached here.
#[derive(Clone)]
pub struct SolidIdentity {
    pod: SolidPod,
    web_id: Option<WebId>,
}

impl SolidIdentity {
    pub fn new(pod: SolidPod, web_id: Option<WebId>) -> Self {
        Self { pod, web_id }
    }

    fn me(&self) -> Result<&WebId, StorageError> {
        self.web_id
            .as_ref()
            .ok_or_else(|| StorageError::Unauthorized("no WebId configured".to_string()))
    }

    async fn profile(&self, who: &WebId) -> Result<Graph, StorageError> {
        self.pod.graph(&profile_document(who)?).await
    }

    async fn update_knows(&self, verb: &str, peer: &WebId) -> Result<(), StorageError> {
        let me = self.me()?;
        let document = profile_document(me)?;
        self.pod.patch(&document, &knows_update(verb, me, peer)).await
    }
}

#[async_trait]
impl IdentityProvider for SolidIdentity {
    async fn session(&self) -> Option<WebId> {
        self.web_id.clone()
    }

    async fn profile_field(&self, predicate: &str) -> Result<Option<String>, StorageError> {
        let me = self.me()?;
        let graph = self.profile(me).await?;
        Ok(field(&graph, me, predicate))
    }

    async fn friends(&self) -> Result<Vec<WebId>, StorageError> {
        let me = self.me()?;
        let graph = self.profile(me).await?;
        Ok(graph
            .objects(me.as_str(), &format!("{FOAF}knows"))
            .filter_map(Term::as_iri)
            .map(WebId::from)
            .collect())
    }

    async fn add_friend(&self, peer: &WebId) -> Result<(), StorageError> {
        self.update_knows("INSERT", peer).await?;
        info!("Added {} to profile", peer);
        Ok(())
    }

    async fn remove_friend(&self, peer: &WebId) -> Result<(), StorageError> {
        self.update_knows("DELETE", peer).await?;
        info!("Removed {} from profile", peer);
        Ok(())
    }

    async fn friend_field(
        &self,
        peer: &WebId,
        predicate: &str,
    ) -> Result<Option<String>, StorageError> {
        let graph = self.profile(peer).await?;
        Ok(field(&graph, peer, predicate))
    }
}

/// The document a WebId lives in: the WebId without its fragment.
fn profile_document(who: &WebId) -> Result<String, StorageError> {
    let mut url = Url::parse(who.as_str())
        .map_err(|e| StorageError::Transport(format!("bad WebId {}: {}", who, e)))?;
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Value of `predicate` (a local name) on `who`, looked up in vCard first
/// and FOAF second.
fn field(graph: &Graph, who: &WebId, predicate: &str) -> Option<String> {
    [VCARD, FOAF]
        .iter()
        .find_map(|ns| graph.object(who.as_str(), &format!("{ns}{predicate}")))
        .and_then(Term::value)
        .map(str::to_string)
}

fn knows_update(verb: &str, me: &WebId, peer: &WebId) -> String {
    format!("{verb} DATA {{ <{me}> <{FOAF}knows> <{peer}> . }}")
}
