use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use dechat_core::acl;
use dechat_core::codec;
use dechat_core::memory::{MemoryDirectory, MemoryPod};
use dechat_core::provision::ProvisionState;
use dechat_core::{ChatError, ConversationSession, RemoteStorage};
use dechat_types::events::SessionEvent;
use dechat_types::models::{RawMessage, WebId};
use dechat_types::snapshot::LogStatus;

const ALICE_CHAT_BOB: &str = "https://alice.pod.example/private/dechat/chat_bob/";
const ALICE_CHAT_CAROL: &str = "https://alice.pod.example/private/dechat/chat_carol/";
const BOB_CHAT_ALICE: &str = "https://bob.pod.example/private/dechat/chat_alice/";

fn alice() -> WebId {
    WebId::new("https://alice.pod.example/profile/card#me")
}

fn bob() -> WebId {
    WebId::new("https://bob.pod.example/profile/card#me")
}

fn carol() -> WebId {
    WebId::new("https://carol.pod.example/profile/card#me")
}

struct World {
    pod: MemoryPod,
    directory: MemoryDirectory,
}

impl World {
    async fn new() -> Self {
        let directory = MemoryDirectory::new();
        directory.register(&alice(), "Alice").await;
        directory.register(&bob(), "Bob").await;
        directory.register(&carol(), "Carol").await;
        Self {
            pod: MemoryPod::new(),
            directory,
        }
    }

    fn session(&self, me: &WebId) -> ConversationSession {
        ConversationSession::new(Arc::new(self.pod.clone()), Arc::new(self.directory.sign_in(me)))
    }

    /// Alice and Bob, each with their folder for the other provisioned.
    async fn connected(&self) -> (ConversationSession, ConversationSession) {
        let a = self.session(&alice());
        let b = self.session(&bob());
        assert!(matches!(a.switch_to(&bob()).await, Err(ChatError::PeerNotReady)));
        b.switch_to(&alice()).await.unwrap();
        a.refresh().await.unwrap();
        (a, b)
    }

    async fn put(&self, folder: &str, name: &str, sender: WebId, text: &str, secs: i64) {
        let raw = RawMessage {
            sender,
            text: text.to_string(),
            sent_at: Utc.timestamp_opt(secs, 0).unwrap(),
        };
        self.pod
            .update_file(&format!("{folder}{name}"), &codec::encode(&raw))
            .await
            .unwrap();
    }
}

fn texts(session: &ConversationSession) -> Vec<String> {
    session.snapshot().messages.iter().map(|m| m.text.clone()).collect()
}

#[tokio::test]
async fn two_parties_exchange_messages() {
    let world = World::new().await;
    let (a, b) = world.connected().await;

    a.send("hi bob").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    b.refresh().await.unwrap();
    b.send("hey alice").await.unwrap().unwrap();
    a.refresh().await.unwrap();

    assert_eq!(texts(&a), vec!["hi bob", "hey alice"]);
    assert_eq!(texts(&b), vec!["hi bob", "hey alice"]);

    let log = a.snapshot();
    assert_eq!(log.status, LogStatus::Ready);
    assert_eq!(log.messages[0].sender_name, "Alice");
    assert_eq!(log.messages[1].sender_name, "Bob");
    assert!(log.messages[1].resource.as_deref().unwrap().starts_with(BOB_CHAT_ALICE));
}

#[tokio::test]
async fn owner_and_peer_messages_interleave_by_time() {
    let world = World::new().await;
    world.put(ALICE_CHAT_BOB, "1.ttl", alice(), "t10", 10).await;
    world.put(ALICE_CHAT_BOB, "2.ttl", alice(), "t30", 30).await;
    world.put(BOB_CHAT_ALICE, "1.ttl", bob(), "t20", 20).await;

    let a = world.session(&alice());
    assert_eq!(a.switch_to(&bob()).await.unwrap(), 3);
    assert_eq!(texts(&a), vec!["t10", "t20", "t30"]);

    let times: Vec<_> = a.snapshot().messages.iter().map(|m| m.sent_at).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn reloading_unchanged_storage_is_idempotent() {
    let world = World::new().await;
    world.put(ALICE_CHAT_BOB, "1.ttl", alice(), "same time", 10).await;
    world.put(BOB_CHAT_ALICE, "1.ttl", bob(), "same time too", 10).await;
    world.put(BOB_CHAT_ALICE, "2.ttl", bob(), "later", 11).await;

    let a = world.session(&alice());
    a.switch_to(&bob()).await.unwrap();
    let first = a.snapshot().messages.to_vec();
    a.refresh().await.unwrap();
    let second = a.snapshot().messages.to_vec();

    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn sent_message_appears_exactly_once() {
    let world = World::new().await;
    let (a, _b) = world.connected().await;
    let mut events = a.subscribe_events();

    let resource = a.send("only once").await.unwrap().unwrap();

    let log = a.snapshot();
    let matching: Vec<_> = log.messages.iter().filter(|m| m.text == "only once").collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].resource.as_deref(), Some(resource.as_str()));
    assert_eq!(world.pod.files_under(ALICE_CHAT_BOB).await.iter().filter(|f| f.ends_with(".ttl")).count(), 1);

    let mut sent = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::MessageSent { resource: r, .. } = event {
            assert_eq!(r, resource);
            sent = true;
        }
    }
    assert!(sent);
}

#[tokio::test]
async fn empty_text_sends_nothing() {
    let world = World::new().await;
    let (a, _b) = world.connected().await;
    a.send("already here").await.unwrap();

    let before = a.snapshot();
    let files_before = world.pod.files_under("https://alice.pod.example/").await;

    assert_eq!(a.send("").await.unwrap(), None);
    assert_eq!(a.send("   \n").await.unwrap(), None);

    let after = a.snapshot();
    assert_eq!(world.pod.files_under("https://alice.pod.example/").await, files_before);
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.messages.to_vec(), before.messages.to_vec());
}

#[tokio::test]
async fn unlistable_peer_folder_never_shows_one_side() {
    let world = World::new().await;
    world.put(ALICE_CHAT_BOB, "1.ttl", alice(), "mine", 10).await;
    world.put(BOB_CHAT_ALICE, "1.ttl", bob(), "theirs", 20).await;
    world.pod.fail_reads_under(BOB_CHAT_ALICE).await;

    let a = world.session(&alice());
    let err = a.switch_to(&bob()).await.unwrap_err();

    assert!(matches!(err, ChatError::PeerNotReady));
    assert!(err.is_recoverable());
    let log = a.snapshot();
    assert_eq!(log.status, LogStatus::WaitingForPeer);
    assert!(log.is_empty());

    world.pod.clear_failures().await;
    assert_eq!(a.refresh().await.unwrap(), 2);
}

#[tokio::test]
async fn send_before_peer_is_ready_still_writes() {
    let world = World::new().await;
    let a = world.session(&alice());
    let _ = a.switch_to(&bob()).await;

    let resource = a.send("anyone there?").await.unwrap().unwrap();

    assert!(resource.starts_with(ALICE_CHAT_BOB));
    assert_eq!(a.snapshot().status, LogStatus::WaitingForPeer);

    let b = world.session(&bob());
    assert_eq!(b.switch_to(&alice()).await.unwrap(), 1);
    assert_eq!(texts(&b), vec!["anyone there?"]);
}

#[tokio::test]
async fn failed_write_is_surfaced_and_reconciled() {
    let world = World::new().await;
    let (a, _b) = world.connected().await;
    world.pod.fail_writes_under(ALICE_CHAT_BOB).await;

    let err = a.send("lost").await.unwrap_err();

    assert!(matches!(err, ChatError::StorageWriteFailed { .. }));
    assert!(texts(&a).is_empty());
}

#[tokio::test]
async fn superseded_switch_never_publishes() {
    let world = World::new().await;
    world.put(BOB_CHAT_ALICE, "1.ttl", bob(), "from bob", 10).await;
    world.pod.create_folder(ALICE_CHAT_BOB).await.unwrap();
    // keep the load of Bob's side in flight
    world
        .pod
        .slow_down(BOB_CHAT_ALICE, Duration::from_millis(100))
        .await;

    let a = world.session(&alice());
    let (bob, carol) = (bob(), carol());
    let (first, second) = tokio::join!(a.switch_to(&bob), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.switch_to(&carol).await
    });

    assert!(matches!(first, Err(ChatError::Superseded)));
    assert!(matches!(second, Err(ChatError::PeerNotReady)));

    let log = a.snapshot();
    assert_eq!(log.peer, Some(crate::carol()));
    assert_eq!(log.generation, 2);
    assert_eq!(log.status, LogStatus::WaitingForPeer);
    assert!(log.is_empty());
    assert_eq!(a.active_peer().await, Some(crate::carol()));
}

#[tokio::test]
async fn switch_superseded_during_provisioning_is_dropped() {
    let world = World::new().await;
    world
        .pod
        .slow_down(ALICE_CHAT_BOB, Duration::from_millis(100))
        .await;

    let a = world.session(&alice());
    let (bob, carol) = (bob(), carol());
    let (first, _) = tokio::join!(a.switch_to(&bob), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.switch_to(&carol).await
    });

    assert!(matches!(first, Err(ChatError::Superseded)));
    // the interrupted provisioning still finished with its descriptor
    assert!(world.pod.exists(&format!("{ALICE_CHAT_BOB}.acl")).await);
    assert_eq!(a.snapshot().peer, Some(crate::carol()));
}

#[tokio::test]
async fn independent_sessions_provision_one_consistent_folder() {
    let world = World::new().await;
    let phone = world.session(&alice());
    let laptop = world.session(&alice());

    let bob = bob();
    let _ = tokio::join!(phone.switch_to(&bob), laptop.switch_to(&bob));

    let acl_path = format!("{ALICE_CHAT_BOB}.acl");
    let acls: Vec<_> = world
        .pod
        .files_under(ALICE_CHAT_BOB)
        .await
        .into_iter()
        .filter(|f| f.ends_with(".acl"))
        .collect();
    assert_eq!(acls, vec![acl_path.clone()]);
    assert_eq!(
        world.pod.read_file(&acl_path).await.unwrap(),
        acl::render(ALICE_CHAT_BOB, &alice(), &crate::bob())
    );
    assert!(phone.folder_state(&crate::bob()).await.unwrap().is_ready());
}

#[tokio::test]
async fn removing_a_peer_deletes_only_that_conversation() {
    let world = World::new().await;
    let (a, _b) = world.connected().await;
    a.add_peer(&bob()).await.unwrap();
    a.add_peer(&carol()).await.unwrap();
    let _ = a.switch_to(&carol()).await;
    a.switch_to(&bob()).await.unwrap();
    a.send("before removal").await.unwrap();

    a.remove_peer(&bob()).await.unwrap();

    assert!(!world.pod.exists(ALICE_CHAT_BOB).await);
    assert!(world.pod.exists(ALICE_CHAT_CAROL).await);
    assert!(world.pod.exists(BOB_CHAT_ALICE).await);
    assert!(matches!(
        a.folder_state(&bob()).await.unwrap(),
        ProvisionState::Unknown
    ));
    assert!(a.folder_state(&carol()).await.unwrap().is_ready());

    let friends: Vec<_> = a.friends().into_iter().map(|p| p.web_id).collect();
    assert_eq!(friends, vec![carol()]);

    assert!(!a.is_active().await);
    let log = a.snapshot();
    assert_eq!(log.status, LogStatus::Idle);
    assert!(log.is_empty());
    assert_eq!(a.send("into the void").await.unwrap(), None);
}

#[tokio::test]
async fn removing_an_inactive_peer_keeps_the_active_conversation() {
    let world = World::new().await;
    let (a, _b) = world.connected().await;
    a.add_peer(&carol()).await.unwrap();
    let _ = a.switch_to(&carol()).await;
    a.switch_to(&bob()).await.unwrap();

    a.remove_peer(&carol()).await.unwrap();

    assert!(!world.pod.exists(ALICE_CHAT_CAROL).await);
    assert!(a.is_active().await);
    assert_eq!(a.active_peer().await, Some(bob()));
    assert_eq!(a.snapshot().status, LogStatus::Ready);
}
