// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

//! vlayer - a virtual item-state overlay for a content repository
//!
//! Synthetic node subtrees are populated on demand by pluggable providers
//! and never reach storage; commits are filtered before they do.
//!
//! Set VLAYER_LOG to control logging:
//! - VLAYER_LOG=off (default) - silent
//! - VLAYER_LOG=info - commit summaries
//! - VLAYER_LOG=debug - cache and filter decisions

/// Node and property identities
pub mod id;

/// Item states and property values
pub mod state;

// Error types
pub mod error;

// Manager configuration
pub mod config;

// Provider trait and registry
pub mod provider;

// External/virtual classification
pub mod classify;

/// Storage and access-check seams
pub mod persistence;
pub mod memory_persistence;

// Change logs and their commit-time filter
pub mod change_log;
pub mod filter;

pub mod deleted_externals;

/// On-demand population with a per-cycle cache
pub mod population;

/// Session-facing manager
pub mod manager;

// Test providers and fixtures
pub mod testing;

pub use change_log::{ChangeLog, ChangeLogBuilder};
pub use classify::{Classification, classify};
pub use config::ManagerConfig;
pub use deleted_externals::DeletedExternals;
pub use error::{Error, Result};
pub use filter::FilteredChangeLog;
pub use id::{IdKind, ItemId, NodeId, ParameterizedId, PropertyId, Recipe, RegularId, VirtualId};
pub use manager::{UpdateSummary, VirtualLayer, VirtualStateManager};
pub use memory_persistence::MemoryStorage;
pub use persistence::{AccessManager, AllowAll, StorageLayer};
pub use population::{PopulationEngine, ThresholdCounters};
pub use provider::{PopulateContext, Populated, ProviderRegistry, VirtualProvider};
pub use state::{ChildEntry, ItemState, NodeState, PropertyState, Value};
