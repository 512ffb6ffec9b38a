//! `WsConnector` against a local tokio-tungstenite server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_client::protocol::ServerEvent;
use parley_client::ws::ReconnectConfig;
use parley_client::{
    ClientConfig, ConnectionManager, IdentityStore, LifecycleEvent, MemoryStore, WsConnector,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    while let Some(msg) = ws.next().await {
        if let Message::Text(text) = msg.unwrap() {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
    panic!("socket closed before a text frame arrived");
}

async fn recv<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

fn manager_for(url: String, reconnect: ReconnectConfig) -> (ConnectionManager, MemoryStore) {
    let store = MemoryStore::new();
    let config = ClientConfig {
        url,
        state_dir: None,
        reconnect,
    };
    let manager = ConnectionManager::new(
        &config,
        Arc::new(WsConnector::new()),
        IdentityStore::new(Arc::new(store.clone())),
    );
    (manager, store)
}

#[tokio::test]
async fn handshake_session_and_chat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let init = next_json(&mut ws).await;
        let session = json!({"type": "session", "data": {"session_id": "srv-1"}});
        ws.send(Message::Text(session.to_string().into())).await.unwrap();
        let chat = next_json(&mut ws).await;
        let reply = json!({"type": "message", "data": {"content": "3 parks found"}});
        ws.send(Message::Text(reply.to_string().into())).await.unwrap();
        (init, chat)
    });

    let (manager, _store) = manager_for(format!("ws://{addr}"), ReconnectConfig::default());
    let (tx, mut events) = unbounded_channel();
    let _sub = manager.on_event(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    manager.connect();

    let session = recv(&mut events).await;
    assert_eq!(session.session_token(), Some("srv-1"));
    assert!(manager.is_connected());
    assert_eq!(
        manager.identity().session_token().unwrap().as_deref(),
        Some("srv-1")
    );

    assert!(manager.send_message("parks with playgrounds"));
    let reply = recv(&mut events).await;
    assert!(matches!(reply, ServerEvent::Message(ref m) if m.content == "3 parks found"));

    let (init, chat) = server.await.unwrap();
    let client_id = manager.identity().get_or_create_client_id().unwrap();
    assert_eq!(
        init,
        json!({"type": "init", "user_id": client_id, "session_id": null})
    );
    assert_eq!(
        chat,
        json!({"type": "message", "content": "parks with playgrounds"})
    );

    manager.disconnect();
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn reconnects_with_same_identity_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let first = next_json(&mut ws).await;
        let session = json!({"type": "session", "data": {"session_id": "keep-me"}});
        ws.send(Message::Text(session.to_string().into())).await.unwrap();
        ws.close(None).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let second = next_json(&mut ws).await;
        (first, second, ws)
    });

    let reconnect = ReconnectConfig {
        base_delay: Duration::from_millis(20),
        ..ReconnectConfig::default()
    };
    let (manager, _store) = manager_for(format!("ws://{addr}"), reconnect);
    let (tx, mut lifecycle) = unbounded_channel();
    let _sub = manager.on_lifecycle(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    manager.connect();

    loop {
        if let LifecycleEvent::ReconnectScheduled { attempt, .. } = recv(&mut lifecycle).await {
            assert_eq!(attempt, 1);
            break;
        }
    }

    let (first, second, _ws) = server.await.unwrap();
    assert_eq!(first["user_id"], second["user_id"]);
    assert_eq!(first["session_id"], Value::Null);
    assert_eq!(second["session_id"], json!("keep-me"));

    manager.disconnect();
}

#[tokio::test]
async fn gives_up_when_nothing_listens() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let reconnect = ReconnectConfig {
        base_delay: Duration::from_millis(10),
        max_attempts: 2,
        max_delay: None,
    };
    let (manager, _store) = manager_for(format!("ws://{addr}"), reconnect);
    let (tx, mut lifecycle) = unbounded_channel();
    let _sub = manager.on_lifecycle(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    manager.connect();

    let mut scheduled = Vec::new();
    loop {
        match recv(&mut lifecycle).await {
            LifecycleEvent::ReconnectScheduled { attempt, delay } => scheduled.push((attempt, delay)),
            LifecycleEvent::GaveUp { attempts } => {
                assert_eq!(attempts, 2);
                break;
            }
            LifecycleEvent::Connected => panic!("nothing should be listening on {addr}"),
            _ => {}
        }
    }
    assert_eq!(
        scheduled,
        vec![
            (1, Duration::from_millis(10)),
            (2, Duration::from_millis(20)),
        ]
    );
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn stalled_upgrade_times_out_and_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept TCP but never answer the upgrade request.
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            held.push(stream);
        }
    });

    let reconnect = ReconnectConfig {
        base_delay: Duration::from_millis(10),
        max_attempts: 0,
        max_delay: None,
    };
    let config = ClientConfig {
        url: format!("ws://{addr}"),
        state_dir: None,
        reconnect,
    };
    let manager = ConnectionManager::new(
        &config,
        Arc::new(WsConnector::with_connect_timeout(Duration::from_millis(200))),
        IdentityStore::new(Arc::new(MemoryStore::new())),
    );
    let (tx, mut lifecycle) = unbounded_channel();
    let _sub = manager.on_lifecycle(move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    manager.connect();

    assert_eq!(recv(&mut lifecycle).await, LifecycleEvent::Connecting { attempt: 0 });
    assert_eq!(recv(&mut lifecycle).await, LifecycleEvent::Disconnected);
    assert_eq!(recv(&mut lifecycle).await, LifecycleEvent::GaveUp { attempts: 0 });
    assert!(!manager.is_connected());

    // A fresh connect() is accepted again rather than ignored as in progress.
    manager.connect();
    assert_eq!(recv(&mut lifecycle).await, LifecycleEvent::Connecting { attempt: 0 });
    manager.disconnect();
    server.abort();
}
