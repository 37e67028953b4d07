// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Node and property states
//!
//! A state is the in-memory form of one item. States are plain values:
//! whichever component holds one owns it, and hands out `Arc`s that are
//! never mutated in place by anybody else.

use crate::id::{ItemId, NodeId, PropertyId};
use std::collections::BTreeSet;

/// A named link from a node to one of its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    name: String,
    id: NodeId,
}

impl ChildEntry {
    pub fn new<N: Into<String>>(name: N, id: NodeId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    id: NodeId,
    parent: Option<NodeId>,
    node_type: String,
    mixins: BTreeSet<String>,
    children: Vec<ChildEntry>,
    property_names: BTreeSet<String>,
    mod_count: u64,
}

impl NodeState {
    pub fn new<T: Into<String>>(id: NodeId, parent: Option<NodeId>, node_type: T) -> Self {
        Self {
            id,
            parent,
            node_type: node_type.into(),
            mixins: BTreeSet::new(),
            children: Vec::new(),
            property_names: BTreeSet::new(),
            mod_count: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Re-key the state, used when a provider answers for a parameterized id
    pub fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    #[must_use]
    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    #[must_use]
    pub fn mixins(&self) -> &BTreeSet<String> {
        &self.mixins
    }

    pub fn add_mixin<M: Into<String>>(&mut self, mixin: M) {
        _ = self.mixins.insert(mixin.into());
    }

    #[must_use]
    pub fn with_mixin<M: Into<String>>(mut self, mixin: M) -> Self {
        self.add_mixin(mixin);
        self
    }

    #[must_use]
    pub fn children(&self) -> &[ChildEntry] {
        &self.children
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ChildEntry> {
        self.children.iter().find(|entry| entry.name == name)
    }

    #[must_use]
    pub fn has_child(&self, id: &NodeId) -> bool {
        self.children.iter().any(|entry| &entry.id == id)
    }

    pub fn add_child<N: Into<String>>(&mut self, name: N, id: NodeId) {
        self.children.push(ChildEntry::new(name, id));
    }

    #[must_use]
    pub fn with_child<N: Into<String>>(mut self, name: N, id: NodeId) -> Self {
        self.add_child(name, id);
        self
    }

    /// Remove the entry pointing at `id`; returns whether one was present
    pub fn remove_child(&mut self, id: &NodeId) -> bool {
        let before = self.children.len();
        self.children.retain(|entry| &entry.id != id);
        before != self.children.len()
    }

    /// Keep only the child entries matching `keep`; returns how many were dropped
    pub fn retain_children<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&ChildEntry) -> bool,
    {
        let before = self.children.len();
        self.children.retain(keep);
        before - self.children.len()
    }

    pub fn remove_all_children(&mut self) {
        self.children.clear();
    }

    #[must_use]
    pub fn property_names(&self) -> &BTreeSet<String> {
        &self.property_names
    }

    pub fn add_property_name<N: Into<String>>(&mut self, name: N) {
        _ = self.property_names.insert(name.into());
    }

    pub fn remove_property_name(&mut self, name: &str) -> bool {
        self.property_names.remove(name)
    }

    pub fn retain_property_names<F>(&mut self, keep: F)
    where
        F: FnMut(&String) -> bool,
    {
        self.property_names.retain(keep);
    }

    #[must_use]
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub(crate) fn set_mod_count(&mut self, mod_count: u64) {
        self.mod_count = mod_count;
    }
}

/// A single property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    /// A hard reference to another node; storage keeps these consistent
    Reference(NodeId),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyState {
    id: PropertyId,
    values: Vec<Value>,
    multiple: bool,
    mod_count: u64,
}

impl PropertyState {
    pub fn single<V: Into<Value>>(id: PropertyId, value: V) -> Self {
        Self {
            id,
            values: vec![value.into()],
            multiple: false,
            mod_count: 0,
        }
    }

    pub fn multiple(id: PropertyId, values: Vec<Value>) -> Self {
        Self {
            id,
            values,
            multiple: true,
            mod_count: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PropertyId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.id.name()
    }

    #[must_use]
    pub fn parent(&self) -> &NodeId {
        self.id.parent()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// First value; the only one for single-valued properties
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn set_values(&mut self, values: Vec<Value>) {
        self.values = values;
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.multiple
    }

    /// Nodes this property holds hard references to
    pub fn references(&self) -> impl Iterator<Item = &NodeId> {
        self.values.iter().filter_map(|value| match value {
            Value::Reference(target) => Some(target),
            _ => None,
        })
    }

    #[must_use]
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub(crate) fn set_mod_count(&mut self, mod_count: u64) {
        self.mod_count = mod_count;
    }

    /// Move the property under another node, keeping its name and tag
    pub(crate) fn set_parent(&mut self, parent: NodeId) {
        self.id = self.id.with_parent(parent);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Node(NodeState),
    Property(PropertyState),
}

impl ItemState {
    #[must_use]
    pub fn id(&self) -> ItemId {
        match self {
            ItemState::Node(node) => ItemId::Node(node.id().clone()),
            ItemState::Property(prop) => ItemId::Property(prop.id().clone()),
        }
    }

    #[must_use]
    pub fn is_node(&self) -> bool {
        matches!(self, ItemState::Node(_))
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&NodeState> {
        match self {
            ItemState::Node(node) => Some(node),
            ItemState::Property(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut NodeState> {
        match self {
            ItemState::Node(node) => Some(node),
            ItemState::Property(_) => None,
        }
    }

    #[must_use]
    pub fn as_property(&self) -> Option<&PropertyState> {
        match self {
            ItemState::Node(_) => None,
            ItemState::Property(prop) => Some(prop),
        }
    }

    /// The node this item hangs under, if any
    #[must_use]
    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            ItemState::Node(node) => node.parent(),
            ItemState::Property(prop) => Some(prop.parent()),
        }
    }

    #[must_use]
    pub fn mod_count(&self) -> u64 {
        match self {
            ItemState::Node(node) => node.mod_count(),
            ItemState::Property(prop) => prop.mod_count(),
        }
    }

    pub(crate) fn set_mod_count(&mut self, mod_count: u64) {
        match self {
            ItemState::Node(node) => node.set_mod_count(mod_count),
            ItemState::Property(prop) => prop.set_mod_count(mod_count),
        }
    }
}

impl From<NodeState> for ItemState {
    fn from(node: NodeState) -> Self {
        ItemState::Node(node)
    }
}

impl From<PropertyState> for ItemState {
    fn from(prop: PropertyState) -> Self {
        ItemState::Property(prop)
    }
}
