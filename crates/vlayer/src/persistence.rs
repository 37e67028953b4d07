// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::change_log::ChangeLog;
use crate::error::Result;
use crate::id::{ItemId, NodeId, PropertyId};
use crate::state::{NodeState, PropertyState};
use async_trait::async_trait;

/// Pure persistence layer - no caching, no virtual content
///
/// Implementations must report a missing item as `Error::NotFound`, a
/// refused read as `Error::AccessDenied`, a concurrent modification as
/// `Error::Stale` and anything else as `Error::Storage`.
#[async_trait]
pub trait StorageLayer: Send + Sync {
    async fn load_node(&self, id: &NodeId) -> Result<NodeState>;
    async fn load_property(&self, id: &PropertyId) -> Result<PropertyState>;
    async fn exists(&self, id: &ItemId) -> Result<bool>;

    /// Apply a change log atomically. Only ever receives filtered change
    /// logs: no virtual ids, no synthetic children.
    async fn store(&self, changes: &ChangeLog) -> Result<()>;
}

/// Read check consulted before a stored state is exposed
pub trait AccessManager: Send + Sync {
    fn can_read(&self, id: &ItemId) -> bool;
}

/// Grants every read
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessManager for AllowAll {
    fn can_read(&self, _id: &ItemId) -> bool {
        true
    }
}
