// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use crate::id::{ItemId, NodeId, PropertyId};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the virtual layer and its storage collaborator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Only produced by storage and access checks; resolve paths turn it into `NotFound`
    #[error("Access denied: {0}")]
    AccessDenied(ItemId),

    #[error("Stale item state {id}: expected modification {expected}, found {found}")]
    Stale { id: ItemId, expected: u64, found: u64 },

    #[error("Referential integrity violation: {target} is still referenced by {referrer}")]
    ReferentialIntegrity { target: NodeId, referrer: PropertyId },

    #[error("Item already exists: {0}")]
    AlreadyExists(ItemId),

    #[error("Operation requires an edit scope")]
    NotInEditMode,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found<I: Into<ItemId>>(id: I) -> Self {
        Error::NotFound(id.into())
    }

    pub fn access_denied<I: Into<ItemId>>(id: I) -> Self {
        Error::AccessDenied(id.into())
    }

    pub fn already_exists<I: Into<ItemId>>(id: I) -> Self {
        Error::AlreadyExists(id.into())
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Error::Storage(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Stale states may succeed after the session refreshes and retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Stale { .. })
    }
}

impl From<serde_yaml_ng::Error> for Error {
    fn from(err: serde_yaml_ng::Error) -> Error {
        Error::Config(err.to_string())
    }
}
