//! Real-time socket layer for the chat search client.
//!
//! This module provides:
//! - A single managed connection with a resumable identity handshake
//! - Auto-reconnect with bounded exponential backoff
//! - Typed fan-out of server events to independent listeners
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │  (state machine, handshake, reconnect scheduling)   │
//! └─────────────────────────────────────────────────────┘
//!          │              │               │
//!          ▼              ▼               ▼
//!   ┌────────────┐ ┌──────────────┐ ┌─────────────┐
//!   │ Connector  │ │IdentityStore │ │ReconnectPol.│
//!   │(transport) │ │ (kv store)   │ │  (backoff)  │
//!   └────────────┘ └──────────────┘ └─────────────┘
//!                         │
//!                         ▼
//!              ┌─────────────────────┐
//!              │     EventRouter     │
//!              └─────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌──────────────┐
//!   │  on_event  │ │  on_event  │ │ on_connection│
//!   │  listener  │ │  listener  │ │   _change    │
//!   └────────────┘ └────────────┘ └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let identity = IdentityStore::new(Arc::new(FileStore::in_config_dir("parley")?));
//! let manager = ConnectionManager::new(&config, Arc::new(WsConnector::new()), identity);
//!
//! let _events = manager.on_event(|event| {
//!     println!("{}", event.tag());
//!     Ok(())
//! });
//! manager.connect();
//! manager.send_message("vegan restaurants open late");
//! ```

mod manager;
#[cfg(test)]
mod mock;
mod native;
mod reconnect;
mod router;
mod transport;

pub use manager::{ConnectionManager, ConnectionState};
pub use native::{WsConnector, DEFAULT_CONNECT_TIMEOUT};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use router::{EventRouter, LifecycleEvent, Subscription};
pub use transport::{Connector, Transport, TransportError, TransportEvent, TransportEvents};
