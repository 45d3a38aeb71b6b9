//! Credential wiping when the login endpoint itself starts looping.
//!
//! A login request stuck in a loop usually means the stored credentials are
//! stale or corrupt; discarding them breaks the cycle.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

/// Storage keys holding authentication state.
pub const DEFAULT_AUTH_KEYS: &[&str] = &["token", "user", "authData"];

/// Cookie names holding authentication state.
pub const DEFAULT_AUTH_COOKIES: &[&str] = &["token", "authToken"];

/// Hook invoked when the login URL is blocked.
pub trait CredentialWiper: Send + Sync {
    fn wipe(&self, url: &str);
}

/// Wiper that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWiper;

impl CredentialWiper for NoopWiper {
    fn wipe(&self, _url: &str) {}
}

impl<F> CredentialWiper for F
where
    F: Fn(&str) + Send + Sync,
{
    fn wipe(&self, url: &str) {
        self(url)
    }
}

#[derive(Debug, Default)]
struct SessionData {
    local: HashMap<String, String>,
    session: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

/// In-memory client session: persistent values, per-session values, and cookies.
///
/// Clones share the same storage. The guarded HTTP client reads the bearer
/// token from here, and the guard wipes the auth entries when login loops.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data: Arc<RwLock<SessionData>>,
    auth_keys: Vec<String>,
    auth_cookies: Vec<String>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_auth_names(
            DEFAULT_AUTH_KEYS.iter().copied(),
            DEFAULT_AUTH_COOKIES.iter().copied(),
        )
    }

    /// Create a store with deployment-specific auth key and cookie names.
    pub fn with_auth_names<K, C>(keys: K, cookies: C) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            data: Arc::new(RwLock::new(SessionData::default())),
            auth_keys: keys.into_iter().map(Into::into).collect(),
            auth_cookies: cookies.into_iter().map(Into::into).collect(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_local(&self, key: &str, value: &str) {
        self.write().local.insert(key.to_string(), value.to_string());
    }

    pub fn local(&self, key: &str) -> Option<String> {
        self.read().local.get(key).cloned()
    }

    pub fn set_session(&self, key: &str, value: &str) {
        self.write()
            .session
            .insert(key.to_string(), value.to_string());
    }

    pub fn session(&self, key: &str) -> Option<String> {
        self.read().session.get(key).cloned()
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.write()
            .cookies
            .insert(name.to_string(), value.to_string());
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.read().cookies.get(name).cloned()
    }

    /// Bearer token, preferring the session value over the persistent one.
    pub fn token(&self) -> Option<String> {
        let data = self.read();
        data.session
            .get("token")
            .or_else(|| data.local.get("token"))
            .cloned()
    }

    /// Remove every auth key and cookie. Returns how many entries were dropped.
    pub fn clear_auth(&self) -> usize {
        let mut data = self.write();
        let mut removed = 0;
        for key in &self.auth_keys {
            removed += data.local.remove(key).is_some() as usize;
            removed += data.session.remove(key).is_some() as usize;
        }
        for name in &self.auth_cookies {
            removed += data.cookies.remove(name).is_some() as usize;
        }
        removed
    }
}

impl CredentialWiper for SessionStore {
    fn wipe(&self, url: &str) {
        let removed = self.clear_auth();
        info!(
            "Cleared {} stored auth entries after login loop on {}",
            removed, url
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_clear_auth_only_touches_auth_entries() {
        let store = SessionStore::new();
        store.set_local("token", "abc");
        store.set_local("user", "{\"id\":1}");
        store.set_local("theme", "dark");
        store.set_session("authData", "x");
        store.set_cookie("authToken", "y");
        store.set_cookie("locale", "pt-BR");

        assert_eq!(store.clear_auth(), 4);
        assert_eq!(store.local("token"), None);
        assert_eq!(store.session("authData"), None);
        assert_eq!(store.cookie("authToken"), None);
        assert_eq!(store.local("theme").as_deref(), Some("dark"));
        assert_eq!(store.cookie("locale").as_deref(), Some("pt-BR"));
    }

    #[test]
    fn test_token_prefers_session() {
        let store = SessionStore::new();
        assert_eq!(store.token(), None);
        store.set_local("token", "persistent");
        assert_eq!(store.token().as_deref(), Some("persistent"));
        store.set_session("token", "current");
        assert_eq!(store.token().as_deref(), Some("current"));
    }

    #[test]
    fn test_custom_auth_names() {
        let store = SessionStore::with_auth_names(["jwt"], ["sid"]);
        store.set_local("jwt", "a");
        store.set_local("token", "b");
        store.set_cookie("sid", "c");
        store.wipe("https://portal.example/api/auth/login");
        assert_eq!(store.local("jwt"), None);
        assert_eq!(store.cookie("sid"), None);
        assert_eq!(store.local("token").as_deref(), Some("b"));
    }

    #[test]
    fn test_closure_wiper() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let wiper = move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        wiper.wipe("https://x/api/auth/login");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
