//! Backing-store contract.
//!
//! The template engine persists one encoded record per entity id through a
//! [`BackingStore`]. Semantics are last-write-wins per id; no multi-id
//! transaction is required. Durability, flushing and cross-process
//! visibility belong to the store implementation.
//!
//! [`InMemoryStore`] is the reference implementation used by tests and by
//! callers that only need process-lifetime persistence.

use std::collections::HashMap;

use lineage_core::entity::EntityId;

/// Failure reported by a backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not complete a read, write or enumeration.
    #[error("backing store I/O failed for '{key}': {details}")]
    Io { key: String, details: String },
}

/// Key/value persistence keyed by entity id.
pub trait BackingStore {
    /// Read the bytes stored under `id`, or `None` if nothing is stored.
    fn get(&self, id: &EntityId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `bytes` under `id`, replacing any previous value.
    fn set(&mut self, id: &EntityId, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Delete the value under `id`. Returns `true` if something was deleted.
    fn delete(&mut self, id: &EntityId) -> Result<bool, StoreError>;

    /// Lazily enumerate every stored id. Order is unspecified.
    fn ids(&self) -> Result<Box<dyn Iterator<Item = EntityId> + '_>, StoreError>;

    /// Returns `true` if a value is stored under `id`.
    fn contains(&self, id: &EntityId) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }
}

/// A [`BackingStore`] held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: HashMap<EntityId, Vec<u8>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BackingStore for InMemoryStore {
    fn get(&self, id: &EntityId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(id).cloned())
    }

    fn set(&mut self, id: &EntityId, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(id.clone(), bytes);
        Ok(())
    }

    fn delete(&mut self, id: &EntityId) -> Result<bool, StoreError> {
        Ok(self.entries.remove(id).is_some())
    }

    fn ids(&self) -> Result<Box<dyn Iterator<Item = EntityId> + '_>, StoreError> {
        Ok(Box::new(self.entries.keys().cloned()))
    }

    fn contains(&self, id: &EntityId) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(id))
    }
}
