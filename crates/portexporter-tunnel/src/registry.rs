//! Registry of live tunnels on the relay
//!
//! Maps each gateway identity to the dial capability of its current session.
//! The transport is the only writer; request dispatch only reads.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::dialer::Dialer;

/// Registry for managing connected tunnels
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Arc<RwLock<HashMap<String, Arc<dyn Dialer>>>>,
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRegistry")
            .field("identities", &self.identities())
            .finish()
    }
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel, replacing any live tunnel with the same identity
    ///
    /// Returns the replaced tunnel, if any.
    pub fn register_or_replace(
        &self,
        identity: &str,
        dialer: Arc<dyn Dialer>,
    ) -> Option<Arc<dyn Dialer>> {
        let session_id = dialer.id().to_string();
        let mut tunnels = self.tunnels.write().unwrap_or_else(PoisonError::into_inner);
        let previous = tunnels.insert(identity.to_string(), dialer);

        if let Some(ref replaced) = previous {
            tracing::info!(
                identity = %identity,
                session_id = %session_id,
                replaced_session_id = %replaced.id(),
                "Re-registered tunnel (replaced stale session)"
            );
        } else {
            tracing::info!(identity = %identity, session_id = %session_id, "Registered tunnel");
        }

        previous
    }

    /// Remove the tunnel for `identity` if it still belongs to `session_id`
    ///
    /// A session that was replaced by a reconnect must not evict its
    /// successor when it finally tears down.
    pub fn unregister(&self, identity: &str, session_id: &str) -> bool {
        let mut tunnels = self.tunnels.write().unwrap_or_else(PoisonError::into_inner);

        match tunnels.get(identity) {
            Some(current) if current.id() == session_id => {
                tunnels.remove(identity);
                tracing::info!(identity = %identity, session_id = %session_id, "Unregistered tunnel");
                true
            }
            Some(current) => {
                tracing::debug!(
                    identity = %identity,
                    session_id = %session_id,
                    current_session_id = %current.id(),
                    "Skipping unregister of replaced session"
                );
                false
            }
            None => {
                tracing::debug!(identity = %identity, "Attempted to unregister unknown tunnel");
                false
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<dyn Dialer>> {
        self.tunnels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Identities of all live tunnels, sorted
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .tunnels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        identities.sort();
        identities
    }

    pub fn count(&self) -> usize {
        self.tunnels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
