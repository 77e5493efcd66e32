//! Session store trait — external keyed state with TTL and compare-and-set.
//!
//! The store is the sole source of truth for a session's scope, counters,
//! and history. Concurrent turns for the same session are resolved through
//! `compare_and_set`, never through process-wide locks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ClassPulseError, Result};
use crate::session::SessionState;

/// Session store trait — implement for different KV backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the state for a session, if present.
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>>;

    /// Store the state with a TTL.
    async fn put(&self, session_id: &str, state: &SessionState, ttl: Duration) -> Result<()>;

    /// Atomically replace `expected` with `new`. Returns false when the
    /// stored value no longer matches `expected` (a concurrent turn won).
    async fn compare_and_set(
        &self,
        session_id: &str,
        expected: Option<&SessionState>,
        new: &SessionState,
        ttl: Duration,
    ) -> Result<bool>;

    /// Drop a session entirely.
    async fn reset(&self, session_id: &str) -> Result<()>;
}

/// In-memory store for testing and as the process-local fallback.
///
/// States are kept as serialized JSON so compare-and-set compares canonical
/// snapshots. TTL is ignored; the map lives only as long as the process.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn encode(state: &SessionState) -> Result<String> {
        serde_json::to_string(state).map_err(ClassPulseError::from)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session_id: &str, state: &SessionState, _ttl: Duration) -> Result<()> {
        let encoded = Self::encode(state)?;
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session_id.to_string(), encoded);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        session_id: &str,
        expected: Option<&SessionState>,
        new: &SessionState,
        _ttl: Duration,
    ) -> Result<bool> {
        let expected_encoded = match expected {
            Some(state) => Some(Self::encode(state)?),
            None => None,
        };
        let new_encoded = Self::encode(new)?;
        let mut sessions = self.sessions.lock().unwrap();
        let current = sessions.get(session_id);
        if current.map(String::as_str) != expected_encoded.as_deref() {
            return Ok(false);
        }
        sessions.insert(session_id.to_string(), new_encoded);
        Ok(true)
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(session_id);
        Ok(())
    }
}
