// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! External-vs-virtual classification of item states

use crate::id::{NodeId, PropertyId};
use crate::provider::ProviderRegistry;
use crate::state::{ItemState, NodeState, PropertyState};

bitflags::bitflags! {
    /// How an item relates to the virtual layer. The empty set is REGULAR.
    ///
    /// The two bits are independent: an already-populated synthetic node
    /// whose type is itself registered carries both.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Classification: u8 {
        /// Stored node whose type has a provider decorating it
        const EXTERNAL = 1 << 0;
        /// Identity is synthetic
        const VIRTUAL = 1 << 1;
    }
}

impl Classification {
    pub const REGULAR: Classification = Classification::empty();

    #[must_use]
    pub fn is_regular(self) -> bool {
        self.is_empty()
    }

    #[must_use]
    pub fn is_external(self) -> bool {
        self.contains(Classification::EXTERNAL)
    }

    #[must_use]
    pub fn is_virtual(self) -> bool {
        self.contains(Classification::VIRTUAL)
    }
}

/// Classify any item state. Pure: depends only on the state's identity and
/// type fields and on the (read-only) registry.
#[must_use]
pub fn classify(state: &ItemState, registry: &ProviderRegistry) -> Classification {
    match state {
        ItemState::Node(node) => classify_node(node, registry),
        ItemState::Property(prop) => classify_property(prop, registry),
    }
}

#[must_use]
pub fn classify_node(node: &NodeState, registry: &ProviderRegistry) -> Classification {
    let mut flags = Classification::REGULAR;
    if node.id().is_virtual() {
        flags |= Classification::VIRTUAL;
    }
    if registry.is_external_type(node.node_type()) {
        flags |= Classification::EXTERNAL;
    }
    flags
}

#[must_use]
pub fn classify_property(prop: &PropertyState, registry: &ProviderRegistry) -> Classification {
    if is_virtual_property(prop.id(), registry) {
        Classification::VIRTUAL
    } else {
        Classification::REGULAR
    }
}

/// A property is synthetic when its owner is, when its name is registered
/// as always-virtual, or when its id was tagged by a provider.
#[must_use]
pub fn is_virtual_property(id: &PropertyId, registry: &ProviderRegistry) -> bool {
    id.parent().is_virtual() || id.is_synthetic() || registry.is_virtual_property(id.name())
}

/// Child entries pointing at synthetic nodes must never reach storage
#[must_use]
pub fn is_virtual_child(id: &NodeId) -> bool {
    id.is_virtual()
}
