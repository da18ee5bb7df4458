//! Access descriptors for conversation folders (Web Access Control).

use tracing::{error, info};

use dechat_types::models::WebId;

use crate::address;
use crate::error::{ChatError, Result};
use crate::storage::RemoteStorage;

/// Render the descriptor: `owner` keeps read, write and control; `reader`
/// may only read. Both rules also apply to everything inside the folder.
pub fn render(folder: &str, owner: &WebId, reader: &WebId) -> String {
    format!(
        "@prefix acl: <http://www.w3.org/ns/auth/acl#>.\n\
         \n\
         <#owner>\n    \
             a acl:Authorization;\n    \
             acl:agent <{owner}>;\n    \
             acl:accessTo <{folder}>;\n    \
             acl:default <{folder}>;\n    \
             acl:mode acl:Read, acl:Write, acl:Control.\n\
         \n\
         <#reader>\n    \
             a acl:Authorization;\n    \
             acl:agent <{reader}>;\n    \
             acl:accessTo <{folder}>;\n    \
             acl:default <{folder}>;\n    \
             acl:mode acl:Read.\n",
    )
}

/// Write the descriptor of `folder`, replacing any existing one.
///
/// Never retried here; the caller decides what to do with a failure.
pub async fn grant_read(
    storage: &dyn RemoteStorage,
    folder: &str,
    owner: &WebId,
    grantee: &WebId,
) -> Result<()> {
    let path = address::acl_resource(folder);
    let body = render(folder, owner, grantee);
    match storage.update_file(&path, &body).await {
        Ok(()) => {
            info!("Granted {} read access to {}", grantee, folder);
            Ok(())
        }
        Err(source) => {
            error!("Writing access descriptor {} failed: {}", path, source);
            Err(ChatError::AccessWriteFailed { path, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPod;
    use crate::turtle::{Graph, Term};

    const ACL: &str = "http://www.w3.org/ns/auth/acl#";
    const FOLDER: &str = "https://alice.pod.example/private/dechat/chat_bob/";

    fn alice() -> WebId {
        WebId::new("https://alice.pod.example/profile/card#me")
    }

    fn bob() -> WebId {
        WebId::new("https://bob.pod.example/profile/card#me")
    }

    fn modes(graph: &Graph, rule: &str) -> Vec<String> {
        let subject = format!("{FOLDER}.acl{rule}");
        graph
            .objects(&subject, &format!("{ACL}mode"))
            .filter_map(Term::as_iri)
            .map(|m| m.trim_start_matches(ACL).to_string())
            .collect()
    }

    #[test]
    fn descriptor_grants_owner_control_and_peer_read() {
        let body = render(FOLDER, &alice(), &bob());
        let graph = Graph::parse(&body, &format!("{FOLDER}.acl")).unwrap();

        assert_eq!(modes(&graph, "#owner"), vec!["Read", "Write", "Control"]);
        assert_eq!(modes(&graph, "#reader"), vec!["Read"]);

        let reader = format!("{FOLDER}.acl#reader");
        assert_eq!(
            graph.object(&reader, &format!("{ACL}agent")).and_then(Term::as_iri),
            Some(bob().as_str())
        );
        assert_eq!(
            graph.object(&reader, &format!("{ACL}default")).and_then(Term::as_iri),
            Some(FOLDER)
        );
    }

    #[tokio::test]
    async fn grant_overwrites_existing_descriptor() {
        let pod = MemoryPod::new();
        pod.create_folder(FOLDER).await.unwrap();
        pod.update_file(&format!("{FOLDER}.acl"), "stale").await.unwrap();

        grant_read(&pod, FOLDER, &alice(), &bob()).await.unwrap();

        let body = pod.read_file(&format!("{FOLDER}.acl")).await.unwrap();
        assert_eq!(body, render(FOLDER, &alice(), &bob()));
    }

    #[tokio::test]
    async fn failed_write_surfaces_access_error() {
        let pod = MemoryPod::new();
        pod.fail_writes_under(FOLDER).await;

        let err = grant_read(&pod, FOLDER, &alice(), &bob()).await.unwrap_err();
        assert!(matches!(err, ChatError::AccessWriteFailed { .. }));
    }
}
