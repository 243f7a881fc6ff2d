use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::config::RedirectEntry;
use crate::error::RedirectError;
use crate::handler::RedirectHandler;

/// Redirect handlers keyed by `scheme://host`
///
/// Keys are fixed at load time. Readers clone the handler `Arc` and release
/// the lock before serving, so a swap never waits on in-flight requests.
#[derive(Clone, Default)]
pub struct RedirectTable {
    handlers: Arc<RwLock<HashMap<String, Arc<RedirectHandler>>>>,
}

impl RedirectTable {
    /// Build a handler per entry
    ///
    /// Fails without registering anything if an address repeats or any
    /// handler cannot be built.
    pub fn load(entries: &[RedirectEntry]) -> Result<Self, RedirectError> {
        let mut handlers = HashMap::with_capacity(entries.len());
        for entry in entries {
            if handlers.contains_key(&entry.address) {
                return Err(RedirectError::DuplicateAddress(entry.address.clone()));
            }
            handlers.insert(
                entry.address.clone(),
                Arc::new(RedirectHandler::build(entry)?),
            );
        }

        for entry in entries {
            info!("Registered redirect {}", entry);
        }

        Ok(Self {
            handlers: Arc::new(RwLock::new(handlers)),
        })
    }

    pub fn get(&self, address: &str) -> Option<Arc<RedirectHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    /// Swap the handler for an already registered address, returning the old one
    pub fn replace(
        &self,
        address: &str,
        handler: RedirectHandler,
    ) -> Result<Arc<RedirectHandler>, RedirectError> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match handlers.get_mut(address) {
            Some(slot) => Ok(std::mem::replace(slot, Arc::new(handler))),
            None => Err(RedirectError::NotRegistered(address.to_string())),
        }
    }

    /// Registered addresses, sorted
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
