//! key-value storage for the lockbox secret
//!
//! hosts provide a persistent store (keychain, app storage). values are
//! strings; binary secrets are stored base64 encoded.
//!
//! implementations:
//! - memory: in-process map for tests and the simulator

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{Error, Result};

/// slot holding the lockbox key
pub const LOCKBOX_KEY_SLOT: &str = "@lockbox_encryption_key";
/// slot holding the lockbox nonce
pub const LOCKBOX_NONCE_SLOT: &str = "@lockbox_encryption_nonce";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// drop every entry
    async fn clear(&self) -> Result<()>;
}

/// in-memory store, cheap to clone and share
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("lock poisoned".into())
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
