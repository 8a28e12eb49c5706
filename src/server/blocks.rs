//! Local content membership

use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock},
};

use bytes::Bytes;

/// Answers whether this node physically holds the content addressed by a key.
pub trait BlockStore: std::fmt::Debug + Send + Sync {
    fn has(&self, key: &[u8]) -> bool;
}

#[derive(Debug, Default)]
/// A set of content keys held in memory.
pub struct MemoryBlockStore {
    keys: RwLock<HashSet<Bytes>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<Bytes>) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into());
    }

    pub fn remove(&self, key: &[u8]) -> bool {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}

impl BlockStore for MemoryBlockStore {
    fn has(&self, key: &[u8]) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}
