// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Test providers and fixtures
//!
//! Reusable providers for exercising the virtual layer in unit and
//! integration tests. They count their calls so tests can tell a cache
//! hit from a fresh population.

use crate::id::{NodeId, PropertyId, VirtualId};
use crate::provider::{PopulateContext, Populated, VirtualProvider};
use crate::state::{NodeState, PropertyState, Value};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const FACET_PROVIDER: &str = "facets";
pub const FACET_SEARCH_TYPE: &str = "facet:search";
pub const FACET_BUCKET_TYPE: &str = "facet:bucket";
pub const FACET_COUNT: &str = "facet:count";
pub const FACET_VALUE: &str = "facet:value";
pub const FACET_QUERY: &str = "facet:query";

/// Decorates `facet:search` nodes with one synthetic bucket per facet value
/// and a `facet:count` property. Buckets are virtual nodes regenerated by
/// the same provider.
#[derive(Debug)]
pub struct FacetProvider {
    values: Vec<String>,
    external_calls: AtomicUsize,
    populate_calls: AtomicUsize,
}

impl FacetProvider {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            external_calls: AtomicUsize::new(0),
            populate_calls: AtomicUsize::new(0),
        }
    }

    /// Provider for the facet values "red" and "blue"
    #[must_use]
    pub fn colors() -> Arc<Self> {
        Arc::new(Self::new(["red", "blue"]))
    }

    /// Id of the bucket this provider generates for `value` under `source`
    #[must_use]
    pub fn bucket_id(source: &NodeId, value: &str) -> NodeId {
        NodeId::from(VirtualId::from_parts(FACET_PROVIDER, source.clone(), value))
    }

    #[must_use]
    pub fn external_calls(&self) -> usize {
        self.external_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn populate_calls(&self) -> usize {
        self.populate_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.external_calls() + self.populate_calls()
    }
}

#[async_trait]
impl VirtualProvider for FacetProvider {
    fn name(&self) -> &str {
        FACET_PROVIDER
    }

    fn node_types(&self) -> Vec<String> {
        vec![FACET_SEARCH_TYPE.to_string()]
    }

    fn virtual_properties(&self) -> Vec<String> {
        vec![FACET_COUNT.to_string()]
    }

    async fn populate(&self, ctx: &PopulateContext, id: &VirtualId) -> anyhow::Result<Populated> {
        _ = self.populate_calls.fetch_add(1, Ordering::SeqCst);
        let value = id.recipe().name();
        if !self.values.iter().any(|v| v == value) {
            anyhow::bail!("no facet value '{value}'");
        }

        let node_id = NodeId::from(id.clone());
        let node = NodeState::new(node_id.clone(), Some(id.source().clone()), FACET_BUCKET_TYPE);
        let mut populated = Populated::new(node).with_property(PropertyState::single(
            PropertyId::synthetic(node_id.clone(), FACET_VALUE),
            value,
        ));
        if let Some(query) = ctx.parameters() {
            populated = populated.with_property(PropertyState::single(
                PropertyId::synthetic(node_id, FACET_QUERY),
                query,
            ));
        }
        Ok(populated)
    }

    async fn populate_external(
        &self,
        _ctx: &PopulateContext,
        mut node: NodeState,
    ) -> anyhow::Result<Populated> {
        _ = self.external_calls.fetch_add(1, Ordering::SeqCst);
        for value in &self.values {
            let bucket = Self::bucket_id(node.id(), value);
            if !node.has_child(&bucket) {
                node.add_child(value.clone(), bucket);
            }
        }
        let count = i64::try_from(self.values.len())?;
        let id = PropertyId::new(node.id().clone(), FACET_COUNT);
        Ok(Populated::new(node).with_property(PropertyState::single(id, Value::Long(count))))
    }
}

pub const NESTED_PROVIDER: &str = "nested";

/// Produces virtual `facet:search` nodes, so its output is both virtual and
/// external. Each node carries a leftover `stale` bucket that the type
/// provider must replace.
#[derive(Debug, Default)]
pub struct NestedSearchProvider;

impl NestedSearchProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Id of the search node generated under `source`
    #[must_use]
    pub fn search_id(source: &NodeId) -> NodeId {
        NodeId::from(VirtualId::from_parts(NESTED_PROVIDER, source.clone(), "search"))
    }
}

#[async_trait]
impl VirtualProvider for NestedSearchProvider {
    fn name(&self) -> &str {
        NESTED_PROVIDER
    }

    async fn populate(&self, _ctx: &PopulateContext, id: &VirtualId) -> anyhow::Result<Populated> {
        let node_id = NodeId::from(id.clone());
        let stale = FacetProvider::bucket_id(&node_id, "stale");
        let node = NodeState::new(node_id, Some(id.source().clone()), FACET_SEARCH_TYPE)
            .with_child("stale", stale);
        Ok(Populated::new(node))
    }
}

/// Fails every population request
#[derive(Debug, Default)]
pub struct FailingProvider {
    calls: AtomicUsize,
}

pub const FAILING_PROVIDER: &str = "broken";
pub const FAILING_TYPE: &str = "broken:type";

impl FailingProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VirtualProvider for FailingProvider {
    fn name(&self) -> &str {
        FAILING_PROVIDER
    }

    fn node_types(&self) -> Vec<String> {
        vec![FAILING_TYPE.to_string()]
    }

    async fn populate(&self, _ctx: &PopulateContext, id: &VirtualId) -> anyhow::Result<Populated> {
        _ = self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("backend unavailable for {id}")
    }

    async fn populate_external(
        &self,
        _ctx: &PopulateContext,
        node: NodeState,
    ) -> anyhow::Result<Populated> {
        _ = self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("backend unavailable for {}", node.id())
    }
}

/// A stored `facet:search` node with no children
#[must_use]
pub fn facet_search_node(parent: Option<NodeId>) -> NodeState {
    NodeState::new(NodeId::new_regular(), parent, FACET_SEARCH_TYPE)
}

/// A stored plain node
#[must_use]
pub fn plain_node(parent: Option<NodeId>) -> NodeState {
    NodeState::new(NodeId::new_regular(), parent, "nt:unstructured")
}
