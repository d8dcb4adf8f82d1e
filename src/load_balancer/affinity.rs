//! Session affinity (sticky sessions).
//!
//! # Responsibilities
//! - Bind a session ID to the server that first handled it
//! - Expire bindings after a sliding TTL
//! - Drop bindings lazily on lookup, and in bulk via `purge_expired`

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A session bound to a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAffinity {
    pub session_id: String,
    pub server_id: String,
    pub last_accessed: Instant,
    pub expires_at: Instant,
}

impl SessionAffinity {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A thread-safe map of session ID -> affinity.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: DashMap<String, SessionAffinity>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bound server ID if the binding has not expired.
    ///
    /// Expired bindings are removed.
    pub fn lookup(&self, session_id: &str, now: Instant) -> Option<String> {
        match self.inner.get(session_id) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.server_id.clone()),
            Some(_) => {}
            None => return None,
        }
        self.inner.remove_if(session_id, |_, affinity| affinity.is_expired(now));
        None
    }

    /// Create or refresh a binding, pushing its expiry to `now + ttl`.
    pub fn bind(&self, session_id: &str, server_id: &str, now: Instant, ttl: Duration) {
        let expires_at = now + ttl;
        self.inner
            .entry(session_id.to_string())
            .and_modify(|affinity| {
                affinity.server_id = server_id.to_string();
                affinity.last_accessed = now;
                affinity.expires_at = expires_at;
            })
            .or_insert_with(|| SessionAffinity {
                session_id: session_id.to_string(),
                server_id: server_id.to_string(),
                last_accessed: now,
                expires_at,
            });
    }

    pub fn get(&self, session_id: &str) -> Option<SessionAffinity> {
        self.inner.get(session_id).map(|r| r.value().clone())
    }

    /// Remove the binding only while it still points at `server_id`.
    pub fn unbind(&self, session_id: &str, server_id: &str) -> bool {
        self.inner
            .remove_if(session_id, |_, affinity| affinity.server_id == server_id)
            .is_some()
    }

    /// Drop every expired binding. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, affinity| !affinity.is_expired(now));
        before.saturating_sub(self.inner.len())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_bind_and_lookup() {
        let store = SessionStore::new();
        let now = Instant::now();

        assert!(store.lookup("s1", now).is_none());
        store.bind("s1", "a", now, TTL);
        assert_eq!(store.lookup("s1", now + Duration::from_secs(30)).as_deref(), Some("a"));
    }

    #[test]
    fn test_expired_binding_is_dropped() {
        let store = SessionStore::new();
        let now = Instant::now();
        store.bind("s1", "a", now, TTL);

        assert!(store.lookup("s1", now + TTL).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_refresh_slides_expiry() {
        let store = SessionStore::new();
        let now = Instant::now();
        store.bind("s1", "a", now, TTL);
        store.bind("s1", "a", now + Duration::from_secs(50), TTL);

        let affinity = store.get("s1").unwrap();
        assert_eq!(affinity.last_accessed, now + Duration::from_secs(50));
        assert_eq!(affinity.expires_at, now + Duration::from_secs(110));
    }

    #[test]
    fn test_unbind_keeps_rebound_session() {
        let store = SessionStore::new();
        let now = Instant::now();
        store.bind("s1", "a", now, TTL);
        store.bind("s1", "b", now, TTL);

        assert!(!store.unbind("s1", "a"));
        assert_eq!(store.get("s1").unwrap().server_id, "b");

        assert!(store.unbind("s1", "b"));
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let store = SessionStore::new();
        let now = Instant::now();
        store.bind("old", "a", now, Duration::from_secs(5));
        store.bind("new", "b", now, TTL);

        assert_eq!(store.purge_expired(now + Duration::from_secs(10)), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }
}
