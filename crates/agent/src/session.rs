//! Session registry: one agent per session id.
//!
//! The registry is an explicit value owned by whoever hosts the
//! orchestrator. Lookup and insertion happen under one lock, so concurrent
//! first requests for the same session end up sharing a single agent.
//! Idle sessions expire after a TTL and the least recently used session is
//! evicted when the registry is full. A session whose value is still held
//! by a request is never evicted, so one id never maps to two live values.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hisho_config::SessionConfig;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::agent::Agent;

/// An agent shared between the registry and in-flight requests.
///
/// Holding the async lock serializes generation within a session.
pub type Shared<T> = Arc<tokio::sync::Mutex<T>>;

/// The agent handle stored per session.
pub type SharedAgent = Shared<Agent>;

struct Entry<T> {
    value: Shared<T>,
    last_access: Instant,
}

impl<T> Entry<T> {
    /// Held outside the registry, e.g. by a request that is generating.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.value) > 1
    }
}

/// Get-or-create store of per-session values (agents in production).
pub struct SessionRegistry<T = Agent> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    ttl: Duration,
    max_sessions: usize,
}

impl<T> SessionRegistry<T> {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_sessions)
    }

    /// Resolve the value for `session_id`, creating it with `create` if needed.
    ///
    /// An absent or empty id always yields a fresh value that is not
    /// registered. Returns the value and whether it was just created.
    pub fn resolve(&self, session_id: Option<&str>, create: impl FnOnce() -> T) -> (Shared<T>, bool) {
        let Some(key) = session_id.filter(|id| !id.is_empty()) else {
            return (Arc::new(tokio::sync::Mutex::new(create())), true);
        };

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries, now);

        if let Some(entry) = entries.get_mut(key) {
            entry.last_access = now;
            return (Arc::clone(&entry.value), false);
        }

        if entries.len() >= self.max_sessions {
            let oldest = entries
                .iter()
                .filter(|(_, entry)| !entry.in_use())
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(oldest) => {
                    debug!(session_id = %oldest, "Evicting least recently used session");
                    entries.remove(&oldest);
                }
                None => warn!(
                    sessions = entries.len(),
                    max_sessions = self.max_sessions,
                    "Every session is in use, growing past capacity"
                ),
            }
        }

        let value = Arc::new(tokio::sync::Mutex::new(create()));
        entries.insert(
            key.to_string(),
            Entry {
                value: Arc::clone(&value),
                last_access: now,
            },
        );
        (value, true)
    }

    /// Drop every session idle for longer than the TTL and not in use.
    /// Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut entries, Instant::now())
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry<T>>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.in_use() || now.duration_since(entry.last_access) < self.ttl
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Expired idle sessions");
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
