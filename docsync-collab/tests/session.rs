//! Session behaviour against a scripted server.
//!
//! The loopback transport stands in for the network so every message the
//! client sends can be inspected and every server event injected in order.

use std::sync::Arc;

use docsync_collab::{
    loopback, ClientConfig, ClientMessage, DocumentRequest, NoticeLevel, Notifier, RejoinPolicy,
    ServerEnd, ServerMessage, Session, SessionError, SharedSurface,
};
use docsync_core::{Delta, DocumentId, MemorySurface, RichTextSurface, SurfaceError};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

fn test_config() -> ClientConfig {
    ClientConfig {
        server_url: "loopback".to_string(),
        autosave_interval: Duration::from_secs(3600),
        load_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

struct Harness {
    session: Session<MemorySurface>,
    server: ServerEnd,
    surface: SharedSurface<MemorySurface>,
    id: DocumentId,
}

async fn open_with(config: ClientConfig, snapshot: Delta) -> Harness {
    let (transport, mut server) = loopback(64);
    let surface = Arc::new(Mutex::new(MemorySurface::default()));
    let id = DocumentId::new();

    let script = async {
        let first = server.recv().await;
        assert_eq!(first, Some(ClientMessage::GetDocument(DocumentRequest::new(id))));
        server.send(ServerMessage::LoadDocument(snapshot)).await;
    };
    let open = Session::open(&config, DocumentRequest::new(id), surface.clone(), transport, Notifier::default());
    let (session, ()) = tokio::join!(open, script);

    Harness { session: session.unwrap(), server, surface, id }
}

async fn open(snapshot: Delta) -> Harness {
    open_with(test_config(), snapshot).await
}

async fn wait_for_text(surface: &SharedSurface<MemorySurface>, expected: &str) {
    timeout(Duration::from_secs(5), async {
        while surface.lock().await.text() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("surface never reached expected text");
}

#[tokio::test]
async fn test_surface_read_only_until_loaded() {
    let (transport, mut server) = loopback(64);
    let surface = Arc::new(Mutex::new(MemorySurface::default()));
    let id = DocumentId::new();

    let script = async {
        server.recv().await;
        {
            let mut surface = surface.lock().await;
            assert!(!surface.is_enabled());
            assert_eq!(surface.append_text("too early"), Err(SurfaceError::ReadOnly));
        }
        server.send(ServerMessage::LoadDocument(Delta::new().insert("S0\n"))).await;
    };
    let config = test_config();
    let open = Session::open(&config, DocumentRequest::new(id), surface.clone(), transport, Notifier::default());
    let (session, ()) = tokio::join!(open, script);
    let session = session.unwrap();

    let guard = surface.lock().await;
    assert!(guard.is_enabled());
    assert_eq!(guard.text(), "S0\n");
    drop(guard);
    session.close().await;
}

#[tokio::test]
async fn test_second_load_document_is_ignored() {
    let mut h = open(Delta::new().insert("first\n")).await;

    assert!(h.server.send(ServerMessage::LoadDocument(Delta::new().insert("second\n"))).await);
    // A later remote change proves the event stream has moved past the load.
    h.server.send(ServerMessage::ReceiveChanges(Delta::new().insert(">"))).await;
    wait_for_text(&h.surface, ">first\n").await;

    h.session.close().await;
}

#[tokio::test]
async fn test_user_edits_go_out_as_send_changes() {
    let mut h = open(Delta::new().insert("abc\n")).await;

    h.surface.lock().await.user_edit(Delta::new().retain(3).insert("d")).unwrap();

    let sent = timeout(Duration::from_secs(5), h.server.recv()).await.unwrap();
    assert_eq!(sent, Some(ClientMessage::SendChanges(Delta::new().retain(3).insert("d"))));
    h.session.close().await;
}

#[tokio::test]
async fn test_inbound_delta_causes_no_outbound() {
    let mut h = open(Delta::new().insert("base\n")).await;

    h.server.send(ServerMessage::ReceiveChanges(Delta::new().retain(4).insert("!"))).await;
    wait_for_text(&h.surface, "base!\n").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.server.try_recv().is_none());
    h.session.close().await;
}

#[tokio::test]
async fn test_remote_deltas_apply_in_receipt_order() {
    let mut h = open(Delta::new().insert("\n")).await;

    for ch in ["a", "b", "c"] {
        h.server.send(ServerMessage::ReceiveChanges(Delta::new().insert(ch))).await;
    }
    // Each insert lands at the start, so order shows in the result.
    wait_for_text(&h.surface, "cba\n").await;
    h.session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_autosave_ticks_send_equal_snapshots() {
    let config = ClientConfig {
        autosave_interval: Duration::from_millis(2000),
        load_timeout: None,
        ..test_config()
    };
    let mut h = open_with(config, Delta::new().insert("steady\n")).await;

    let first = h.server.recv().await;
    let second = h.server.recv().await;
    assert_eq!(first, Some(ClientMessage::SaveDocument(Delta::new().insert("steady\n"))));
    assert_eq!(first, second);
    h.session.close().await;
}

#[tokio::test]
async fn test_teardown_silences_everything() {
    let h = open(Delta::new().insert("doc\n")).await;
    let Harness { session, mut server, surface, .. } = h;
    let revision = surface.lock().await.revision();

    session.close().await;

    // The client side is gone: injected events have nowhere to go.
    assert!(!server.send(ServerMessage::ReceiveChanges(Delta::new().insert("late"))).await);
    assert!(!server.send(ServerMessage::UserCount(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(surface.lock().await.revision(), revision);
    assert_eq!(surface.lock().await.listener_count(), 0);
    assert_eq!(server.recv().await, None);
}

#[tokio::test]
async fn test_not_found_is_fatal() {
    let (transport, mut server) = loopback(64);
    let surface = Arc::new(Mutex::new(MemorySurface::default()));
    let notifier = Notifier::default();
    let mut notices = notifier.subscribe();
    let id = DocumentId::new();

    let script = async {
        server.recv().await;
        server.send(ServerMessage::DocumentNotFound(id)).await;
    };
    let config = test_config();
    let open = Session::open(&config, DocumentRequest::new(id), surface.clone(), transport, notifier);
    let (result, ()) = tokio::join!(open, script);

    assert!(matches!(result, Err(SessionError::NotFound(missing)) if missing == id));
    assert!(!surface.lock().await.is_enabled());
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "File Not Found !");
    // Everything mounted was released.
    assert_eq!(server.recv().await, None);
}

#[tokio::test]
async fn test_presence_tracks_latest_count() {
    let h = open(Delta::new().insert("\n")).await;
    assert_eq!(h.session.user_count(), 0);
    assert!(h.session.presence_display().indicators.is_empty());

    let mut counts = h.session.watch_presence().unwrap();
    h.server.send(ServerMessage::UserCount(2)).await;
    h.server.send(ServerMessage::UserCount(7)).await;
    timeout(Duration::from_secs(5), counts.wait_for(|n| *n == 7)).await.unwrap().unwrap();

    let display = h.session.presence_display();
    assert_eq!(display.indicators.len(), 3);
    assert_eq!(display.overflow_label().as_deref(), Some("+4"));
    h.session.close().await;
}

#[tokio::test]
async fn test_rebind_after_reconnect_ignores_second_load() {
    let mut h = open(Delta::new().insert("mine\n")).await;
    assert_eq!(test_config().rejoin_policy, RejoinPolicy::Rebind);

    h.server.disconnect().await;
    h.server.reconnect().await;
    assert_eq!(
        timeout(Duration::from_secs(5), h.server.recv()).await.unwrap(),
        Some(ClientMessage::GetDocument(DocumentRequest::new(h.id)))
    );

    h.server.send(ServerMessage::LoadDocument(Delta::new().insert("server copy\n"))).await;
    h.server.send(ServerMessage::ReceiveChanges(Delta::new().insert("+"))).await;
    wait_for_text(&h.surface, "+mine\n").await;
    h.session.close().await;
}

#[tokio::test]
async fn test_stay_policy_does_not_rejoin() {
    let config = ClientConfig { rejoin_policy: RejoinPolicy::Stay, ..test_config() };
    let mut h = open_with(config, Delta::new().insert("\n")).await;

    h.server.disconnect().await;
    h.server.reconnect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.server.try_recv().is_none());
    h.session.close().await;
}

#[tokio::test]
async fn test_change_right_after_load_is_applied() {
    let (transport, mut server) = loopback(64);
    let surface = Arc::new(Mutex::new(MemorySurface::default()));
    let id = DocumentId::new();

    // Another peer's edit is fanned out right behind the snapshot.
    let script = async {
        server.recv().await;
        server.send(ServerMessage::LoadDocument(Delta::new().insert("base\n"))).await;
        server.send(ServerMessage::ReceiveChanges(Delta::new().retain(4).insert("!"))).await;
    };
    let config = test_config();
    let open = Session::open(&config, DocumentRequest::new(id), surface.clone(), transport, Notifier::default());
    let (session, ()) = tokio::join!(open, script);
    let session = session.unwrap();

    wait_for_text(&surface, "base!\n").await;
    session.close().await;
}

#[tokio::test]
async fn test_edit_right_after_enable_is_sent() {
    let (transport, mut server) = loopback(64);
    let surface = Arc::new(Mutex::new(MemorySurface::default()));
    let id = DocumentId::new();

    // Type the moment the surface turns editable, while the session is
    // still finishing its mount.
    let script = async {
        server.recv().await;
        server.send(ServerMessage::LoadDocument(Delta::new().insert("\n"))).await;
        loop {
            {
                let mut surface = surface.lock().await;
                if surface.is_enabled() {
                    surface.append_text("quick").unwrap();
                    break;
                }
            }
            tokio::task::yield_now().await;
        }
        timeout(Duration::from_secs(5), server.recv()).await.unwrap()
    };
    let config = test_config();
    let open = Session::open(&config, DocumentRequest::new(id), surface.clone(), transport, Notifier::default());
    let (session, sent) = tokio::join!(open, script);

    assert_eq!(sent, Some(ClientMessage::SendChanges(Delta::new().insert("quick"))));
    session.unwrap().close().await;
}

#[tokio::test]
async fn test_not_found_after_rejoin_posts_notice() {
    let mut h = open(Delta::new().insert("local\n")).await;
    let mut notices = h.session.notifier().subscribe();

    h.server.disconnect().await;
    h.server.reconnect().await;
    assert_eq!(
        timeout(Duration::from_secs(5), h.server.recv()).await.unwrap(),
        Some(ClientMessage::GetDocument(DocumentRequest::new(h.id)))
    );
    h.server.send(ServerMessage::DocumentNotFound(h.id)).await;

    let notice = timeout(Duration::from_secs(5), notices.recv()).await.unwrap().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "File Not Found !");
    // The local copy stays editable.
    assert!(h.surface.lock().await.is_enabled());
    h.session.close().await;
}
