//! Parley Client - session/transport layer for chat-driven search
//!
//! Owns one socket to the search backend, keeps a resumable identity across
//! reconnects, and fans typed server events out to the UI.

pub mod config;
pub mod identity;
pub mod logging;
pub mod storage;
pub mod ws;

pub use config::ClientConfig;
pub use identity::IdentityStore;
pub use parley_shared as protocol;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use ws::{ConnectionManager, ConnectionState, LifecycleEvent, Subscription, WsConnector};
