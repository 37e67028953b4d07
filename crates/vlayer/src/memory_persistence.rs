// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! In-memory storage layer for testing and embedding
//!
//! Applies change logs atomically: every check runs before anything is
//! written. Detects stale writes through modification counts and refuses
//! deletions that would leave dangling references.

use crate::change_log::ChangeLog;
use crate::error::{Error, Result};
use crate::id::{ItemId, NodeId, PropertyId};
use crate::persistence::StorageLayer;
use crate::state::{ItemState, NodeState, PropertyState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct MemoryStorage(Arc<Mutex<State>>);

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, NodeState>,
    properties: HashMap<PropertyId, PropertyState>,
    // Reads of these ids fail with AccessDenied
    denied: HashSet<ItemId>,
    commits: u64,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a node directly, bypassing change-log validation
    pub async fn insert_node(&self, node: NodeState) {
        let mut state = self.0.lock().await;
        _ = state.nodes.insert(node.id().clone(), node);
    }

    /// Seed a property directly, bypassing change-log validation
    pub async fn insert_property(&self, prop: PropertyState) {
        let mut state = self.0.lock().await;
        _ = state.properties.insert(prop.id().clone(), prop);
    }

    /// Make reads of `id` fail with `AccessDenied`
    pub async fn deny(&self, id: ItemId) {
        _ = self.0.lock().await.denied.insert(id);
    }

    /// Number of change logs applied so far
    pub async fn commit_count(&self) -> u64 {
        self.0.lock().await.commits
    }

    pub async fn node_count(&self) -> usize {
        self.0.lock().await.nodes.len()
    }

    /// Stored version of a node, bypassing access checks
    pub async fn stored_node(&self, id: &NodeId) -> Option<NodeState> {
        self.0.lock().await.nodes.get(id).cloned()
    }
}

impl State {
    fn check_readable(&self, id: ItemId) -> Result<()> {
        if self.denied.contains(&id) {
            Err(Error::AccessDenied(id))
        } else {
            Ok(())
        }
    }

    fn stored_mod_count(&self, id: &ItemId) -> Option<u64> {
        match id {
            ItemId::Node(id) => self.nodes.get(id).map(NodeState::mod_count),
            ItemId::Property(id) => self.properties.get(id).map(PropertyState::mod_count),
        }
    }

    fn validate(&self, changes: &ChangeLog) -> Result<()> {
        let all = changes
            .added()
            .iter()
            .chain(changes.modified())
            .chain(changes.deleted());
        for item in all {
            check_no_virtual_content(item)?;
        }

        for item in changes.added() {
            let id = item.id();
            if self.stored_mod_count(&id).is_some() {
                return Err(Error::AlreadyExists(id));
            }
        }

        for item in changes.modified().iter().chain(changes.deleted()) {
            let id = item.id();
            let found = self
                .stored_mod_count(&id)
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            if found != item.mod_count() {
                return Err(Error::Stale {
                    id,
                    expected: item.mod_count(),
                    found,
                });
            }
        }

        self.check_references(changes)
    }

    /// No surviving property may reference a node deleted by `changes`
    fn check_references(&self, changes: &ChangeLog) -> Result<()> {
        let deleted_nodes: HashSet<&NodeId> = changes
            .deleted()
            .iter()
            .filter_map(ItemState::as_node)
            .map(NodeState::id)
            .collect();
        if deleted_nodes.is_empty() {
            return Ok(());
        }

        let deleted_props: HashSet<ItemId> = changes.deleted().iter().map(ItemState::id).collect();
        let rewritten: HashMap<&PropertyId, &PropertyState> = changes
            .added()
            .iter()
            .chain(changes.modified())
            .filter_map(ItemState::as_property)
            .map(|prop| (prop.id(), prop))
            .collect();

        let stored = self
            .properties
            .values()
            .filter(|prop| !rewritten.contains_key(prop.id()));
        let surviving = stored.chain(rewritten.values().copied()).filter(|prop| {
            !deleted_props.contains(&ItemId::Property(prop.id().clone()))
                && !deleted_nodes.contains(prop.parent())
        });

        for prop in surviving {
            if let Some(target) = prop.references().find(|t| deleted_nodes.contains(t)) {
                return Err(Error::ReferentialIntegrity {
                    target: target.clone(),
                    referrer: prop.id().clone(),
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: &ChangeLog) -> Result<()> {
        self.validate(changes)?;

        for item in changes.deleted() {
            match item {
                ItemState::Node(node) => {
                    _ = self.nodes.remove(node.id());
                    self.properties.retain(|id, _| id.parent() != node.id());
                }
                ItemState::Property(prop) => {
                    _ = self.properties.remove(prop.id());
                }
            }
        }

        for item in changes.added() {
            let mut item = item.clone();
            item.set_mod_count(0);
            self.put(item);
        }

        for item in changes.modified() {
            let mut item = item.clone();
            item.set_mod_count(item.mod_count() + 1);
            self.put(item);
        }

        self.commits += 1;
        Ok(())
    }

    fn put(&mut self, item: ItemState) {
        match item {
            ItemState::Node(node) => {
                _ = self.nodes.insert(node.id().clone(), node);
            }
            ItemState::Property(prop) => {
                _ = self.properties.insert(prop.id().clone(), prop);
            }
        }
    }
}

/// Synthetic ids or child entries reaching storage indicate a filter bug
fn check_no_virtual_content(item: &ItemState) -> Result<()> {
    let virtual_id = match item {
        ItemState::Node(node) => {
            if node.id().is_virtual() {
                Some(node.id().to_string())
            } else {
                node.children()
                    .iter()
                    .find(|entry| entry.id().is_virtual())
                    .map(|entry| entry.id().to_string())
            }
        }
        ItemState::Property(prop) => prop
            .parent()
            .is_virtual()
            .then(|| prop.id().to_string()),
    };
    match virtual_id {
        Some(id) => Err(Error::storage(format!("virtual item {id} cannot be stored"))),
        None => Ok(()),
    }
}

#[async_trait]
impl StorageLayer for MemoryStorage {
    async fn load_node(&self, id: &NodeId) -> Result<NodeState> {
        let state = self.0.lock().await;
        state.check_readable(ItemId::Node(id.clone()))?;
        state
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    async fn load_property(&self, id: &PropertyId) -> Result<PropertyState> {
        let state = self.0.lock().await;
        state.check_readable(ItemId::Property(id.clone()))?;
        state
            .properties
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    async fn exists(&self, id: &ItemId) -> Result<bool> {
        Ok(self.0.lock().await.stored_mod_count(id).is_some())
    }

    async fn store(&self, changes: &ChangeLog) -> Result<()> {
        self.0.lock().await.apply(changes)
    }
}
