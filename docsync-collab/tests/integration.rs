//! End-to-end tests: real relay server, real websocket clients.

use std::sync::Arc;

use docsync_collab::{
    ClientConfig, ClientMessage, DocumentRequest, Notifier, RelayConfig, RelayServer,
    ServerMessage, Session, SessionError, SharedSurface,
};
use docsync_core::{Delta, DocumentId, MemorySurface, RichTextSurface};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Start a relay on an ephemeral port.
async fn start_relay(config: RelayConfig) -> (Arc<RelayServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = Arc::new(RelayServer::new(config));
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (server, url)
}

fn client_config(url: &str) -> ClientConfig {
    ClientConfig {
        server_url: url.to_string(),
        autosave_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

fn surface() -> SharedSurface<MemorySurface> {
    Arc::new(Mutex::new(MemorySurface::default()))
}

async fn wait_for_text(surface: &SharedSurface<MemorySurface>, expected: &str) {
    timeout(Duration::from_secs(5), async {
        while surface.lock().await.text() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("surface never became {expected:?}"));
}

#[tokio::test]
async fn test_edit_propagates_to_second_client() {
    let (relay, url) = start_relay(RelayConfig::default()).await;
    let id = DocumentId::new();
    let s0 = Delta::new().insert("Hello\n");
    relay.insert_document(id, s0.clone()).await;

    let config = client_config(&url);
    let surface_a = surface();
    let surface_b = surface();
    let a = Session::connect(&config, DocumentRequest::new(id), surface_a.clone(), Notifier::default())
        .await
        .unwrap();
    let b = Session::connect(&config, DocumentRequest::new(id), surface_b.clone(), Notifier::default())
        .await
        .unwrap();
    assert_eq!(surface_b.lock().await.contents(), s0);

    // D1: append " world" before the final newline.
    let d1 = surface_a.lock().await.append_text(" world").unwrap();
    assert_eq!(d1, Delta::new().retain(5).insert(" world"));

    wait_for_text(&surface_b, "Hello world\n").await;
    assert_eq!(surface_b.lock().await.contents(), s0.compose(&d1));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_user_count_reaches_both_clients() {
    let (_relay, url) = start_relay(RelayConfig::default()).await;
    let id = DocumentId::new();
    let config = client_config(&url);

    let a = Session::connect(&config, DocumentRequest::new(id), surface(), Notifier::default())
        .await
        .unwrap();
    let b = Session::connect(&config, DocumentRequest::new(id), surface(), Notifier::default())
        .await
        .unwrap();

    let mut counts = a.watch_presence().unwrap();
    timeout(Duration::from_secs(5), counts.wait_for(|n| *n == 2)).await.unwrap().unwrap();

    b.close().await;
    timeout(Duration::from_secs(5), counts.wait_for(|n| *n == 1)).await.unwrap().unwrap();
    a.close().await;
}

#[tokio::test]
async fn test_saved_snapshot_served_to_next_client() {
    let (relay, url) = start_relay(RelayConfig::default()).await;
    let id = DocumentId::new();
    let config = ClientConfig {
        autosave_interval: Duration::from_millis(50),
        ..client_config(&url)
    };

    let s = surface();
    let a = Session::connect(&config, DocumentRequest::new(id), s.clone(), Notifier::default())
        .await
        .unwrap();
    s.lock().await.append_text("kept").unwrap();

    timeout(Duration::from_secs(5), async {
        while relay.document(&id).await != Some(Delta::new().insert("kept\n")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    a.close().await;

    let late = surface();
    let b = Session::connect(&config, DocumentRequest::new(id), late.clone(), Notifier::default())
        .await
        .unwrap();
    assert_eq!(late.lock().await.text(), "kept\n");
    b.close().await;
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let (_relay, url) = start_relay(RelayConfig { create_missing: false, ..Default::default() }).await;
    let id = DocumentId::new();

    let s = surface();
    let result = Session::connect(&client_config(&url), DocumentRequest::new(id), s.clone(), Notifier::default()).await;
    assert!(matches!(result, Err(SessionError::NotFound(missing)) if missing == id));

    // A filename asks the relay to create the document.
    let request = DocumentRequest::new(id).with_filename("Fresh");
    let session = Session::connect(&client_config(&url), request, s, Notifier::default())
        .await
        .unwrap();
    session.close().await;
}

async fn next_message<S>(ws: &mut S) -> ServerMessage
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match timeout(Duration::from_secs(5), ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return ServerMessage::decode(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_relay_does_not_echo_to_sender() {
    let (_relay, url) = start_relay(RelayConfig::default()).await;
    let id = DocumentId::new();
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let join = ClientMessage::GetDocument(DocumentRequest::new(id)).encode().unwrap();
    ws.send(Message::Text(join.into())).await.unwrap();

    assert_eq!(next_message(&mut ws).await, ServerMessage::LoadDocument(Delta::new()));
    assert_eq!(next_message(&mut ws).await, ServerMessage::UserCount(1));

    let change = ClientMessage::SendChanges(Delta::new().insert("x")).encode().unwrap();
    ws.send(Message::Text(change.into())).await.unwrap();
    let echoed = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(echoed.is_err(), "sender must not receive its own change");
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = ClientConfig {
        load_timeout: Some(Duration::from_millis(300)),
        ..client_config(&url)
    };
    let result = Session::connect(&config, DocumentRequest::new(DocumentId::new()), surface(), Notifier::default()).await;
    assert!(matches!(result, Err(SessionError::Connect { .. })));
}
