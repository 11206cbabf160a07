//! Keyed registry memoising one resource store per key.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::ResourceStore;
use crate::error::{ControlError, ControlResult};

/// Validated key of a resource store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    /// Validate a raw key.
    ///
    /// Empty and whitespace-only keys cannot identify a remote resource.
    pub fn parse(raw: impl Into<String>) -> ControlResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ControlError::InvalidKey(raw));
        }
        Ok(Self(raw))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Keyed factory and cache of [`ResourceStore`]s.
///
/// `resolve` always returns the same store instance for a key, including
/// under concurrent first access. Stores live as long as the registry unless
/// explicitly evicted.
pub struct StoreRegistry<T> {
    stores: DashMap<StoreKey, Arc<ResourceStore<T>>>,
}

impl<T> StoreRegistry<T>
where
    T: Send + Sync,
{
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stores: DashMap::new(),
        }
    }

    /// Return the store for `key`, creating it in the `New` state if absent.
    pub fn resolve(&self, key: impl AsRef<str>) -> ControlResult<Arc<ResourceStore<T>>> {
        let key = StoreKey::parse(key.as_ref()).inspect_err(|e| {
            error!(error = %e, "refusing to resolve store");
        })?;

        match self.stores.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), "store created");
                let store = Arc::new(ResourceStore::new(entry.key().clone()));
                entry.insert(Arc::clone(&store));
                Ok(store)
            }
        }
    }

    /// Return the store for `key` without creating it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ResourceStore<T>>> {
        let key = StoreKey::parse(key).ok()?;
        self.stores.get(&key).map(|r| Arc::clone(r.value()))
    }

    /// Remove the store for `key`.
    ///
    /// Holders of the evicted store keep a working instance; the next
    /// `resolve` creates a fresh one.
    pub fn evict(&self, key: &str) -> Option<Arc<ResourceStore<T>>> {
        let key = StoreKey::parse(key).ok()?;
        let removed = self.stores.remove(&key).map(|(_, store)| store);
        if removed.is_some() {
            debug!(key = %key, "store evicted");
        }
        removed
    }

    /// Keys currently registered.
    #[must_use]
    pub fn keys(&self) -> Vec<StoreKey> {
        self.stores.iter().map(|r| r.key().clone()).collect()
    }

    /// Returns the number of registered stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Returns true if no stores are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl<T> Default for StoreRegistry<T>
where
    T: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StoreRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.stores.len())
            .finish()
    }
}
