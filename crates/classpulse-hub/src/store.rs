//! Session store composition — primary backend with in-process fallback.
//!
//! When the primary store errors, the call degrades to a process-local
//! in-memory store so the conversation keeps working with reduced
//! durability. The fallback copy is best-effort; it never blocks a turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use classpulse_core::error::Result;
use classpulse_core::session::SessionState;
use classpulse_core::store::{InMemorySessionStore, SessionStore};

/// Primary store with automatic in-memory fallback.
///
/// With no primary configured this is just the in-memory store, which is
/// how tests and single-process deployments run.
pub struct FallbackSessionStore {
    primary: Option<Arc<dyn SessionStore>>,
    fallback: InMemorySessionStore,
}

impl FallbackSessionStore {
    pub fn new(primary: Option<Arc<dyn SessionStore>>) -> Self {
        Self {
            primary,
            fallback: InMemorySessionStore::new(),
        }
    }
}

#[async_trait]
impl SessionStore for FallbackSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
        if let Some(primary) = &self.primary {
            match primary.get(session_id).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    warn!(session = session_id, error = %e, "primary store get failed; using fallback");
                }
            }
        }
        self.fallback.get(session_id).await
    }

    async fn put(&self, session_id: &str, state: &SessionState, ttl: Duration) -> Result<()> {
        if let Some(primary) = &self.primary {
            match primary.put(session_id, state, ttl).await {
                Ok(()) => {
                    // Keep the fallback roughly current so a later primary
                    // outage does not lose the whole session.
                    let _ = self.fallback.put(session_id, state, ttl).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "primary store put failed; using fallback");
                }
            }
        }
        self.fallback.put(session_id, state, ttl).await
    }

    async fn compare_and_set(
        &self,
        session_id: &str,
        expected: Option<&SessionState>,
        new: &SessionState,
        ttl: Duration,
    ) -> Result<bool> {
        if let Some(primary) = &self.primary {
            match primary.compare_and_set(session_id, expected, new, ttl).await {
                Ok(swapped) => {
                    if swapped {
                        let _ = self.fallback.put(session_id, new, ttl).await;
                    }
                    return Ok(swapped);
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "primary store CAS failed; using fallback");
                }
            }
        }
        self.fallback
            .compare_and_set(session_id, expected, new, ttl)
            .await
    }

    async fn reset(&self, session_id: &str) -> Result<()> {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.reset(session_id).await {
                warn!(session = session_id, error = %e, "primary store reset failed");
            }
        }
        self.fallback.reset(session_id).await
    }
}
