//! In-memory store for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{merge_fields, Document, StateStore, StoreError};

/// Deterministic [`StateStore`] fake. Supports fault injection: while
/// offline, every operation fails with `Unavailable`.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Document>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle fault injection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Document>> {
        match self.docs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Document>, StoreError> {
        self.check_online()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, fields: Document, merge: bool) -> Result<(), StoreError> {
        self.check_online()?;
        let mut docs = self.lock();
        match docs.get_mut(key) {
            Some(existing) if merge => merge_fields(existing, fields),
            _ => {
                docs.insert(key.to_string(), fields);
            }
        }
        Ok(())
    }

    async fn update(&self, key: &str, partial: Document) -> Result<(), StoreError> {
        self.check_online()?;
        let mut docs = self.lock();
        match docs.get_mut(key) {
            Some(existing) => {
                merge_fields(existing, partial);
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }
}
