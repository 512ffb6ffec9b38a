//! Durable client identity and resumable session token.

use std::sync::Arc;

use crate::storage::{KeyValueStore, StoreError};

/// Storage key for the permanent client identity.
pub const CLIENT_ID_KEY: &str = "chat_user_id";
/// Storage key for the server-issued session token.
pub const SESSION_TOKEN_KEY: &str = "chat_session_id";

/// Reads and writes the two identity tokens through an injected store.
///
/// Store failures are returned to the caller unchanged.
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Return the persisted client id, generating and persisting one first
    /// if none exists yet.
    pub fn get_or_create_client_id(&self) -> Result<String, StoreError> {
        if let Some(existing) = self.store.get(CLIENT_ID_KEY)? {
            if !existing.is_empty() {
                return Ok(existing);
            }
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        self.store.set(CLIENT_ID_KEY, &client_id)?;
        crate::log_info!("Generated new client id {}", client_id);
        Ok(client_id)
    }

    /// The persisted session token, absent until the server issues one.
    pub fn session_token(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(SESSION_TOKEN_KEY)?
            .filter(|token| !token.is_empty()))
    }

    /// Overwrite the persisted session token.
    pub fn store_session_token(&self, token: &str) -> Result<(), StoreError> {
        self.store.set(SESSION_TOKEN_KEY, token)
    }

    /// Forget the session token so the next handshake starts a new
    /// conversation. The client id is kept.
    pub fn clear_session_token(&self) -> Result<(), StoreError> {
        self.store.remove(SESSION_TOKEN_KEY)
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}
