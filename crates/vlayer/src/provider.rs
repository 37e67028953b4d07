// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Virtual providers and the registry that dispatches to them
//!
//! A provider materializes synthetic content in two situations:
//!
//! 1. `populate`: a virtual id was requested; the provider named in its
//!    recipe regenerates the whole node.
//! 2. `populate_external`: a stored node whose type the provider registered
//!    for was loaded; the provider decorates it with synthetic children.
//!
//! Providers are handed to [`ProviderRegistry::with_providers`] by whoever
//! composes the repository. Once built, the registry is shared behind an
//! `Arc` and only read.

use crate::error::Result;
use crate::id::{NodeId, VirtualId};
use crate::persistence::StorageLayer;
use crate::state::{NodeState, PropertyState};
use async_trait::async_trait;
use diagnostics::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What a provider sees while populating
#[derive(Clone)]
pub struct PopulateContext {
    storage: Arc<dyn StorageLayer>,
    parameters: Option<String>,
}

impl PopulateContext {
    pub fn new(storage: Arc<dyn StorageLayer>, parameters: Option<String>) -> Self {
        Self {
            storage,
            parameters,
        }
    }

    /// Read-only access to stored content the provider derives from
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageLayer> {
        &self.storage
    }

    /// Parameter string of a parameterized request
    #[must_use]
    pub fn parameters(&self) -> Option<&str> {
        self.parameters.as_deref()
    }

    /// Load a stored node the provider derives from
    pub async fn load_node(&self, id: &NodeId) -> Result<NodeState> {
        self.storage.load_node(id).await
    }
}

/// A populated node together with the synthetic properties it carries
#[derive(Debug, Clone, PartialEq)]
pub struct Populated {
    pub node: NodeState,
    pub properties: Vec<PropertyState>,
}

impl Populated {
    #[must_use]
    pub fn new(node: NodeState) -> Self {
        Self {
            node,
            properties: Vec::new(),
        }
    }

    /// Attach a property, registering its name on the node
    #[must_use]
    pub fn with_property(mut self, property: PropertyState) -> Self {
        self.node.add_property_name(property.name());
        self.properties.push(property);
        self
    }
}

/// A pluggable source of synthetic content
///
/// Populate calls must be pure functions of the context and the input so
/// they can be repeated for the same input.
#[async_trait]
pub trait VirtualProvider: Send + Sync {
    /// Name used in virtual id recipes
    fn name(&self) -> &str;

    /// Node types whose stored nodes this provider decorates
    fn node_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Property names that are synthetic wherever they appear
    fn virtual_properties(&self) -> Vec<String> {
        Vec::new()
    }

    /// Regenerate the node named by `id`
    async fn populate(&self, ctx: &PopulateContext, id: &VirtualId) -> anyhow::Result<Populated> {
        _ = ctx;
        anyhow::bail!("provider '{}' cannot materialize {}", self.name(), id)
    }

    /// Decorate a stored node with synthetic children
    async fn populate_external(
        &self,
        ctx: &PopulateContext,
        node: NodeState,
    ) -> anyhow::Result<Populated> {
        _ = ctx;
        Ok(Populated::new(node))
    }
}

/// Node type -> provider, provider name -> provider, and always-virtual
/// property names
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    by_type: HashMap<String, Arc<dyn VirtualProvider>>,
    by_name: HashMap<String, Arc<dyn VirtualProvider>>,
    virtual_properties: HashSet<String>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an explicit provider list
    pub fn with_providers<I>(providers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn VirtualProvider>>,
    {
        let mut registry = Self::new();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    /// Register a provider under its name, node types and virtual properties
    pub fn register(&mut self, provider: Arc<dyn VirtualProvider>) {
        for node_type in provider.node_types() {
            self.register_provider_type(node_type, provider.clone());
        }
        for property in provider.virtual_properties() {
            self.register_provider_property(property);
        }
        let name = provider.name().to_string();
        self.register_provider_name(name, provider);
    }

    /// Later registrations for the same type replace earlier ones
    pub fn register_provider_type<T: Into<String>>(
        &mut self,
        node_type: T,
        provider: Arc<dyn VirtualProvider>,
    ) {
        let node_type = node_type.into();
        let provider_name = provider.name().to_string();
        debug!("Registered provider {provider_name} for node type {node_type}");
        _ = self.by_type.insert(node_type, provider);
    }

    pub fn register_provider_name<N: Into<String>>(
        &mut self,
        name: N,
        provider: Arc<dyn VirtualProvider>,
    ) {
        let name = name.into();
        debug!("Registered provider {name}");
        _ = self.by_name.insert(name, provider);
    }

    pub fn register_provider_property<N: Into<String>>(&mut self, name: N) {
        _ = self.virtual_properties.insert(name.into());
    }

    #[must_use]
    pub fn lookup_by_type(&self, node_type: &str) -> Option<&Arc<dyn VirtualProvider>> {
        self.by_type.get(node_type)
    }

    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&Arc<dyn VirtualProvider>> {
        self.by_name.get(name)
    }

    #[must_use]
    pub fn is_external_type(&self, node_type: &str) -> bool {
        self.by_type.contains_key(node_type)
    }

    #[must_use]
    pub fn is_virtual_property(&self, name: &str) -> bool {
        self.virtual_properties.contains(name)
    }

    /// Registered provider names, sorted
    #[must_use]
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort_unstable();
        let mut properties: Vec<&String> = self.virtual_properties.iter().collect();
        properties.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_names())
            .field("types", &types)
            .field("virtual_properties", &properties)
            .finish()
    }
}
