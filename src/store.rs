//! Boundary to the durable secret store.
//!
//! Persistence itself lives in the host application; this crate only hands
//! secrets across the [`SecretStore`] trait. The `secure` flag asks the host
//! to opaque-encrypt the value at rest. A host that has lost its platform
//! encryption capability is expected to degrade to clear text with a warning
//! rather than fail the write.
//!
//! The bundled [`MemoryStore`] backs tests and the CLI binary; it never
//! touches disk, so the `secure` flag is accepted and ignored.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Store keys used by this crate.
pub mod keys {
    /// OAuth client id of the registered application.
    pub const CLIENT_ID: &str = "spotify_client_id";
    /// OAuth client secret of the registered application.
    pub const CLIENT_SECRET: &str = "spotify_client_secret";
    /// Current OAuth access token.
    pub const ACCESS_TOKEN: &str = "spotify_access_token";
    /// Current OAuth refresh token.
    pub const REFRESH_TOKEN: &str = "spotify_refresh_token";
    /// Authorization code captured by the local redirect listener.
    pub const AUTH_CODE: &str = "spotify_auth_code";
    /// The `sp_dc` web session cookie.
    pub const SESSION_COOKIE: &str = "spotify_sp_dc";
    /// Derived socket-auth secret for the dealer channel.
    pub const SOCKET_SECRET: &str = "spotify_socket_secret";
}

/// Durable key/value storage for secrets.
///
/// Implementations must be safe to share between the command client and the
/// event channel, which read and write tokens concurrently.
pub trait SecretStore: Send + Sync {
    /// Reads a value, or `None` when the key was never stored.
    fn get(&self, key: &str, secure: bool) -> Option<String>;

    /// Writes a value, replacing any previous one.
    fn set(&self, key: &str, value: &str, secure: bool);
}

/// In-memory [`SecretStore`] for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store wrapped for shared use.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str, _secure: bool) -> Option<String> {
        self.values
            .lock()
            .map_or(None, |values| values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str, _secure: bool) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_owned(), value.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = MemoryStore::default();
        assert!(store.get(keys::ACCESS_TOKEN, true).is_none());

        store.set(keys::ACCESS_TOKEN, "token", true);
        assert_eq!(store.get(keys::ACCESS_TOKEN, true).as_deref(), Some("token"));

        store.set(keys::ACCESS_TOKEN, "newer", true);
        assert_eq!(store.get(keys::ACCESS_TOKEN, true).as_deref(), Some("newer"));
    }
}
