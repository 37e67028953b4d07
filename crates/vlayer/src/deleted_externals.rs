// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Manager-wide record of deleted external nodes
//!
//! Shared by every session and every change-log filter of one repository,
//! so a deleted external is recorded once and is never repopulated by a
//! session that still has it cached. Bounded: the least recently marked
//! ids are evicted once capacity is reached.

use crate::error::{Error, Result};
use crate::id::NodeId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct DeletedExternals {
    entries: Mutex<LruCache<NodeId, ()>>,
}

impl DeletedExternals {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            Error::Config("deleted externals capacity must be positive".to_string())
        })?;
        Ok(Self::new(capacity))
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<NodeId, ()>> {
        // The map holds no invariants a panicking writer could break
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a deletion; returns false if the id was already recorded
    pub fn mark(&self, id: &NodeId) -> bool {
        let mut entries = self.lock();
        if entries.contains(id) {
            entries.promote(id);
            false
        } else {
            _ = entries.put(id.clone(), ());
            true
        }
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.lock().contains(id)
    }

    /// Drop an id, e.g. when a node with a reused id is created again
    pub fn forget(&self, id: &NodeId) -> bool {
        self.lock().pop(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}

impl std::fmt::Debug for DeletedExternals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletedExternals")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
