// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Item identities
//!
//! Three kinds of node identity exist:
//!
//! - [`RegularId`]: assigned once when a node is physically created
//! - [`VirtualId`]: a recipe (provider name, source node, child name) from
//!   which a provider regenerates the node; never stored
//! - [`ParameterizedId`]: a virtual id plus a parameter string selecting one
//!   of several synthetic views of the same source
//!
//! Virtual identities compare structurally, so two ids built from the same
//! recipe and parameters name the same item for caching purposes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid7::Uuid;

/// Identity of a physically stored node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegularId(Uuid);

impl RegularId {
    /// Allocate a fresh, time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(uuid7::uuid7())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RegularId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegularId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a provider regenerates a virtual node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Recipe {
    provider: String,
    source: NodeId,
    name: String,
}

impl Recipe {
    pub fn new<P: Into<String>, N: Into<String>>(provider: P, source: NodeId, name: N) -> Self {
        Self {
            provider: provider.into(),
            source,
            name: name.into(),
        }
    }

    /// Name of the provider that knows how to populate this node
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// The node this virtual node was derived from (its parent)
    #[must_use]
    pub fn source(&self) -> &NodeId {
        &self.source
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Synthetic node identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualId(Arc<Recipe>);

impl VirtualId {
    /// # Panics
    ///
    /// Panics if the recipe has an empty provider name or child name.
    /// Such a recipe can never be regenerated, so building one is a
    /// programming error.
    #[must_use]
    pub fn new(recipe: Recipe) -> Self {
        assert!(
            !recipe.provider.is_empty(),
            "FATAL: virtual id recipe without a provider name (source {})",
            recipe.source
        );
        assert!(
            !recipe.name.is_empty(),
            "FATAL: virtual id recipe without a child name (provider {})",
            recipe.provider
        );
        Self(Arc::new(recipe))
    }

    /// Shorthand for `VirtualId::new(Recipe::new(..))`
    #[must_use]
    pub fn from_parts<P: Into<String>, N: Into<String>>(provider: P, source: NodeId, name: N) -> Self {
        Self::new(Recipe::new(provider, source, name))
    }

    #[must_use]
    pub fn recipe(&self) -> &Recipe {
        &self.0
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        self.0.provider()
    }

    #[must_use]
    pub fn source(&self) -> &NodeId {
        self.0.source()
    }

    #[must_use]
    pub fn with_parameters<S: Into<String>>(self, parameters: S) -> ParameterizedId {
        ParameterizedId::new(self, parameters)
    }
}

impl fmt::Display for VirtualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "virtual:{}:{}/{}",
            self.0.provider, self.0.source, self.0.name
        )
    }
}

/// A virtual identity carrying a view-selecting parameter string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterizedId {
    base: VirtualId,
    parameters: Arc<str>,
}

impl ParameterizedId {
    pub fn new<S: Into<String>>(base: VirtualId, parameters: S) -> Self {
        let parameters: String = parameters.into();
        Self {
            base,
            parameters: parameters.into(),
        }
    }

    /// The underlying virtual id used for provider dispatch
    #[must_use]
    pub fn base(&self) -> &VirtualId {
        &self.base
    }

    #[must_use]
    pub fn parameters(&self) -> &str {
        &self.parameters
    }
}

impl fmt::Display for ParameterizedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.base, self.parameters)
    }
}

/// Which kind of identity a [`NodeId`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Regular,
    Virtual,
    Parameterized,
}

/// Identity of a node, stored or synthetic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Regular(RegularId),
    Virtual(VirtualId),
    Parameterized(ParameterizedId),
}

impl NodeId {
    /// A fresh regular id
    #[must_use]
    pub fn new_regular() -> Self {
        NodeId::Regular(RegularId::new())
    }

    #[must_use]
    pub fn kind(&self) -> IdKind {
        match self {
            NodeId::Regular(_) => IdKind::Regular,
            NodeId::Virtual(_) => IdKind::Virtual,
            NodeId::Parameterized(_) => IdKind::Parameterized,
        }
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        matches!(self, NodeId::Regular(_))
    }

    /// True for both plain and parameterized virtual ids
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_regular()
    }

    #[must_use]
    pub fn as_regular(&self) -> Option<RegularId> {
        match self {
            NodeId::Regular(id) => Some(*id),
            _ => None,
        }
    }

    /// The virtual id to dispatch on; parameterized ids unwrap to their base
    #[must_use]
    pub fn as_virtual(&self) -> Option<&VirtualId> {
        match self {
            NodeId::Regular(_) => None,
            NodeId::Virtual(id) => Some(id),
            NodeId::Parameterized(id) => Some(id.base()),
        }
    }

    #[must_use]
    pub fn recipe(&self) -> Option<&Recipe> {
        self.as_virtual().map(VirtualId::recipe)
    }

    #[must_use]
    pub fn parameters(&self) -> Option<&str> {
        match self {
            NodeId::Parameterized(id) => Some(id.parameters()),
            _ => None,
        }
    }
}

impl From<RegularId> for NodeId {
    fn from(id: RegularId) -> Self {
        NodeId::Regular(id)
    }
}

impl From<VirtualId> for NodeId {
    fn from(id: VirtualId) -> Self {
        NodeId::Virtual(id)
    }
}

impl From<ParameterizedId> for NodeId {
    fn from(id: ParameterizedId) -> Self {
        NodeId::Parameterized(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Regular(id) => fmt::Display::fmt(id, f),
            NodeId::Virtual(id) => fmt::Display::fmt(id, f),
            NodeId::Parameterized(id) => fmt::Display::fmt(id, f),
        }
    }
}

/// Identity of a property: owning node plus property name.
///
/// A property id may be tagged synthetic by the provider that produced it.
/// The tag is a classification hint only and does not take part in equality.
#[derive(Debug, Clone)]
pub struct PropertyId {
    parent: NodeId,
    name: String,
    synthetic: bool,
}

impl PropertyId {
    pub fn new<N: Into<String>>(parent: NodeId, name: N) -> Self {
        Self {
            parent,
            name: name.into(),
            synthetic: false,
        }
    }

    /// A property id tagged as provider-generated
    pub fn synthetic<N: Into<String>>(parent: NodeId, name: N) -> Self {
        Self {
            parent,
            name: name.into(),
            synthetic: true,
        }
    }

    #[must_use]
    pub fn parent(&self) -> &NodeId {
        &self.parent
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Same name and tag under another node
    #[must_use]
    pub fn with_parent(&self, parent: NodeId) -> Self {
        Self {
            parent,
            name: self.name.clone(),
            synthetic: self.synthetic,
        }
    }
}

impl PartialEq for PropertyId {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent && self.name == other.name
    }
}

impl Eq for PropertyId {}

impl Hash for PropertyId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parent.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/@{}", self.parent, self.name)
    }
}

/// Identity of any item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemId {
    Node(NodeId),
    Property(PropertyId),
}

impl ItemId {
    #[must_use]
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            ItemId::Node(id) => Some(id),
            ItemId::Property(_) => None,
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        ItemId::Node(id)
    }
}

impl From<&NodeId> for ItemId {
    fn from(id: &NodeId) -> Self {
        ItemId::Node(id.clone())
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        ItemId::Property(id)
    }
}

impl From<&PropertyId> for ItemId {
    fn from(id: &PropertyId) -> Self {
        ItemId::Property(id.clone())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Node(id) => fmt::Display::fmt(id, f),
            ItemId::Property(id) => fmt::Display::fmt(id, f),
        }
    }
}
