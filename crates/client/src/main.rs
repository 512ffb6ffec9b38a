//! Parley - terminal host for the chat search socket
//!
//! Reads lines from stdin and sends them as chat messages; prints every
//! server event. `/quit` exits, `/reconnect` forces a new connection and
//! `/new` forgets the session so the server starts a fresh conversation.

use std::sync::Arc;

use anyhow::Context;
use parley_client::protocol::ServerEvent;
use parley_client::{
    log_info, ClientConfig, ConnectionManager, FileStore, IdentityStore, LifecycleEvent,
    WsConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_client::logging::init_tracing("parley_client=debug");

    let config = ClientConfig::from_env();
    let store = match &config.state_dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::in_config_dir("parley").context("locating state directory")?,
    };
    log_info!("Persisting identity under {}", store.dir().display());

    let identity = IdentityStore::new(Arc::new(store));
    let client_id = identity
        .get_or_create_client_id()
        .context("reading client identity")?;
    log_info!("Client id {}", client_id);

    let manager = ConnectionManager::new(&config, Arc::new(WsConnector::new()), identity);

    let _events = manager.on_event(|event| {
        print_event(event);
        Ok(())
    });
    let _connection = manager.on_connection_change(|connected| {
        if connected {
            println!("-- connected");
        } else {
            println!("-- disconnected");
        }
        Ok(())
    });
    let _lifecycle = manager.on_lifecycle(|event| {
        match event {
            LifecycleEvent::GaveUp { attempts } => {
                println!("-- connection lost after {attempts} retries, type /reconnect to try again")
            }
            LifecycleEvent::StoreFailed { reason } => {
                println!("-- cannot access saved identity: {reason}")
            }
            _ => {}
        }
        Ok(())
    });

    manager.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reconnect" => {
                manager.disconnect();
                manager.connect();
            }
            "/new" => {
                manager.disconnect();
                manager
                    .identity()
                    .clear_session_token()
                    .context("clearing session token")?;
                manager.connect();
            }
            text => {
                if !manager.send_message(text) {
                    println!("-- not connected, message not sent");
                }
            }
        }
    }

    manager.disconnect();
    Ok(())
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::Session(session) => {
            if let Some(id) = &session.session_id {
                println!("-- session {id}");
            }
        }
        ServerEvent::Message(message) => println!("{}", message.content),
        ServerEvent::Activity(activity) => {
            println!("   ... {}", activity.message.as_deref().unwrap_or("working"))
        }
        ServerEvent::ToolCall(call) => {
            println!("   [{}] started", call.name.as_deref().unwrap_or("tool"))
        }
        ServerEvent::ToolResult(result) => {
            println!("   [{}] done", result.name.as_deref().unwrap_or("tool"))
        }
        ServerEvent::Other { tag, data } => println!("   <{tag}> {data}"),
    }
}
