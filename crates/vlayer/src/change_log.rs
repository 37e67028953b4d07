// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Change logs
//!
//! A [`ChangeLogBuilder`] collects the states touched during one edit
//! cycle. Building it yields an immutable [`ChangeLog`]: three ordered
//! sequences plus two derived indexes, the changed-parents index (which
//! items changed beneath each node) and the reference index (which
//! properties point at each node).

use crate::id::{ItemId, NodeId, PropertyId};
use crate::state::ItemState;
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeLog {
    added: Vec<ItemState>,
    modified: Vec<ItemState>,
    deleted: Vec<ItemState>,
    changed_parents: IndexMap<NodeId, Vec<ItemId>>,
    references: HashMap<NodeId, Vec<PropertyId>>,
}

impl ChangeLog {
    pub fn new(added: Vec<ItemState>, modified: Vec<ItemState>, deleted: Vec<ItemState>) -> Self {
        let mut changed_parents: IndexMap<NodeId, Vec<ItemId>> = IndexMap::new();
        let mut references: HashMap<NodeId, Vec<PropertyId>> = HashMap::new();

        // Modified nodes only change their own entries; everything else
        // changes what lives beneath its parent.
        let touched = added
            .iter()
            .chain(deleted.iter())
            .chain(modified.iter().filter(|state| !state.is_node()));
        for state in touched {
            if let Some(parent) = state.parent_id() {
                changed_parents
                    .entry(parent.clone())
                    .or_default()
                    .push(state.id());
            }
        }

        for state in added.iter().chain(modified.iter()) {
            if let ItemState::Property(prop) = state {
                for target in prop.references() {
                    references
                        .entry(target.clone())
                        .or_default()
                        .push(prop.id().clone());
                }
            }
        }

        Self {
            added,
            modified,
            deleted,
            changed_parents,
            references,
        }
    }

    #[must_use]
    pub fn added(&self) -> &[ItemState] {
        &self.added
    }

    #[must_use]
    pub fn modified(&self) -> &[ItemState] {
        &self.modified
    }

    #[must_use]
    pub fn deleted(&self) -> &[ItemState] {
        &self.deleted
    }

    /// Items added, deleted, or (for properties) modified directly beneath `parent`
    #[must_use]
    pub fn changes_under(&self, parent: &NodeId) -> &[ItemId] {
        self.changed_parents
            .get(parent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every node with something changed directly beneath it, in log order
    #[must_use]
    pub fn changed_parents(&self) -> impl Iterator<Item = &NodeId> {
        self.changed_parents.keys()
    }

    /// Whether the node itself was added, modified or deleted
    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .filter_map(ItemState::as_node)
            .any(|node| node.id() == id)
    }

    /// Properties in this change log that hold a reference to `target`
    #[must_use]
    pub fn referrers_of(&self, target: &NodeId) -> &[PropertyId] {
        self.references
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_parts(self) -> (Vec<ItemState>, Vec<ItemState>, Vec<ItemState>) {
        (self.added, self.modified, self.deleted)
    }
}

/// Transient changes of one edit cycle, in first-touched order
#[derive(Debug, Default)]
pub struct ChangeLogBuilder {
    added: IndexMap<ItemId, ItemState>,
    modified: IndexMap<ItemId, ItemState>,
    deleted: IndexMap<ItemId, ItemState>,
}

impl ChangeLogBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&mut self, state: ItemState) {
        let id = state.id();
        _ = self.deleted.shift_remove(&id);
        _ = self.added.insert(id, state);
    }

    /// Record a modification. A state added in this cycle stays an addition
    /// and keeps its position.
    pub fn modified(&mut self, state: ItemState) {
        let id = state.id();
        if let Some(slot) = self.added.get_mut(&id) {
            *slot = state;
        } else {
            _ = self.modified.insert(id, state);
        }
    }

    /// Record a deletion. Deleting something added in this cycle leaves no trace.
    pub fn deleted(&mut self, state: ItemState) {
        let id = state.id();
        if self.added.shift_remove(&id).is_some() {
            return;
        }
        _ = self.modified.shift_remove(&id);
        _ = self.deleted.insert(id, state);
    }

    /// The transient version of an item, if it was added or modified
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<&ItemState> {
        self.added.get(id).or_else(|| self.modified.get(id))
    }

    #[must_use]
    pub fn is_added(&self, id: &ItemId) -> bool {
        self.added.contains_key(id)
    }

    #[must_use]
    pub fn is_deleted(&self, id: &ItemId) -> bool {
        self.deleted.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn build(self) -> ChangeLog {
        ChangeLog::new(
            self.added.into_values().collect(),
            self.modified.into_values().collect(),
            self.deleted.into_values().collect(),
        )
    }
}
