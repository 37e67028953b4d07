// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! On-demand population of virtual and external nodes
//!
//! The engine sits between a session and its storage layer:
//!
//! - virtual ids are handed to the provider named in their recipe
//! - stored nodes of a registered type are decorated by that type's provider
//! - everything else is loaded from storage as-is
//!
//! Results are cached for one edit cycle and handed out as `Arc`s, so two
//! lookups of the same id within a cycle return the same instance. The
//! cache is cleared wholesale when the cycle ends.

use crate::classify::{classify_node, is_virtual_property};
use crate::config::ManagerConfig;
use crate::deleted_externals::DeletedExternals;
use crate::error::{Error, Result};
use crate::id::{ItemId, NodeId, PropertyId, VirtualId};
use crate::persistence::{AccessManager, StorageLayer};
use crate::provider::{PopulateContext, Populated, ProviderRegistry};
use crate::state::{NodeState, PropertyState};
use diagnostics::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-cycle counts compared against the configured ceilings.
/// Crossing a ceiling is reported, never enforced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdCounters {
    pub virtual_states: usize,
    pub parameterized_views: usize,
    pub changelog_entries: usize,
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    virtual_states: usize,
    parameterized_views: usize,
    changelog_entries: usize,
}

impl From<&ManagerConfig> for Thresholds {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            virtual_states: config.virtual_state_threshold,
            parameterized_views: config.parameterized_view_threshold,
            changelog_entries: config.changelog_threshold,
        }
    }
}

pub struct PopulationEngine {
    registry: Arc<ProviderRegistry>,
    storage: Arc<dyn StorageLayer>,
    access: Arc<dyn AccessManager>,
    deleted_externals: Arc<DeletedExternals>,

    nodes: HashMap<NodeId, Arc<NodeState>>,
    properties: HashMap<PropertyId, Arc<PropertyState>>,
    // Virtual states produced in this cycle
    virtual_states: HashSet<ItemId>,

    counters: ThresholdCounters,
    thresholds: Thresholds,
}

impl PopulationEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        storage: Arc<dyn StorageLayer>,
        access: Arc<dyn AccessManager>,
        deleted_externals: Arc<DeletedExternals>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            access,
            deleted_externals,
            nodes: HashMap::new(),
            properties: HashMap::new(),
            virtual_states: HashSet::new(),
            counters: ThresholdCounters::default(),
            thresholds: Thresholds::from(config),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Resolve a node, populating it if it is virtual or external
    pub async fn resolve_node(&mut self, id: &NodeId) -> Result<Arc<NodeState>> {
        if let Some(hit) = self.nodes.get(id) {
            return Ok(hit.clone());
        }
        if id.is_regular() && self.deleted_externals.contains(id) {
            return Err(Error::not_found(id));
        }

        let populated = match id.as_virtual() {
            Some(vid) => {
                let vid = vid.clone();
                self.populate_virtual(id, &vid).await?
            }
            None => Populated::new(self.load_stored(id).await?),
        };
        let populated = self.populate_external(populated).await?;
        Ok(self.cache(populated))
    }

    /// Resolve a property. Synthetic properties are produced together with
    /// their node, so their node is resolved first.
    pub async fn resolve_property(&mut self, id: &PropertyId) -> Result<Arc<PropertyState>> {
        if let Some(hit) = self.properties.get(id) {
            return Ok(hit.clone());
        }

        if is_virtual_property(id, &self.registry) {
            _ = self.resolve_node(id.parent()).await?;
            return self
                .properties
                .get(id)
                .cloned()
                .ok_or_else(|| Error::not_found(id));
        }

        if !self.access.can_read(&ItemId::from(id)) {
            return Err(Error::not_found(id));
        }
        let prop = match self.storage.load_property(id).await {
            Ok(prop) => prop,
            Err(Error::AccessDenied(_)) => return Err(Error::not_found(id)),
            Err(err) => return Err(err),
        };
        let prop = Arc::new(prop);
        _ = self.properties.insert(id.clone(), prop.clone());
        Ok(prop)
    }

    /// Load a stored node without consulting any provider or the cache
    pub async fn load_unpopulated(&self, id: &NodeId) -> Result<NodeState> {
        if id.is_virtual() {
            return Err(Error::not_found(id));
        }
        self.load_stored(id).await
    }

    /// Drop a node and its synthetic properties, then populate it afresh
    pub async fn repopulate(&mut self, id: &NodeId) -> Result<Arc<NodeState>> {
        self.evict(id);
        self.resolve_node(id).await
    }

    pub fn evict(&mut self, id: &NodeId) {
        if self.nodes.remove(id).is_some() {
            self.properties.retain(|prop, _| prop.parent() != id);
            _ = self.virtual_states.remove(&ItemId::from(id));
        }
    }

    /// End of an edit cycle: forget everything populated or loaded
    pub fn clear(&mut self) {
        let cached = self.nodes.len();
        let produced = self.virtual_states.len();
        debug!("Clearing population cache: {cached} nodes, {produced} virtual states");
        self.nodes.clear();
        self.properties.clear();
        self.virtual_states.clear();
        self.counters = ThresholdCounters::default();
    }

    #[must_use]
    pub fn is_cached(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn cached_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn counters(&self) -> ThresholdCounters {
        self.counters
    }

    /// Record the size of the change log being committed
    pub fn record_changelog(&mut self, entries: usize) {
        self.counters.changelog_entries = entries;
        if entries > self.thresholds.changelog_entries {
            let ceiling = self.thresholds.changelog_entries;
            warn!("Change log of {entries} entries exceeds threshold {ceiling}");
        }
    }

    /// Whether any per-cycle counter is past its ceiling
    #[must_use]
    pub fn exceeds_threshold(&self) -> bool {
        self.counters.virtual_states > self.thresholds.virtual_states
            || self.counters.parameterized_views > self.thresholds.parameterized_views
            || self.counters.changelog_entries > self.thresholds.changelog_entries
    }

    async fn load_stored(&self, id: &NodeId) -> Result<NodeState> {
        if !self.access.can_read(&ItemId::from(id)) {
            return Err(Error::not_found(id));
        }
        match self.storage.load_node(id).await {
            Err(Error::AccessDenied(_)) => Err(Error::not_found(id)),
            other => other,
        }
    }

    async fn populate_virtual(&mut self, id: &NodeId, vid: &VirtualId) -> Result<Populated> {
        let source = vid.source();
        if source.is_regular() && !self.access.can_read(&ItemId::from(source)) {
            return Err(Error::not_found(id));
        }

        let provider_name = vid.provider().to_string();
        let Some(provider) = self.registry.lookup_by_name(&provider_name).cloned() else {
            let node_id = id.to_string();
            debug!("No provider {provider_name} registered for {node_id}");
            return Err(Error::not_found(id));
        };

        let ctx = PopulateContext::new(
            self.storage.clone(),
            id.parameters().map(str::to_string),
        );
        let mut populated = match provider.populate(&ctx, vid).await {
            Ok(populated) => populated,
            Err(err) => {
                return Err(self.population_failed(id, provider_name, err));
            }
        };

        // Parameterized requests are cached under the full id
        if populated.node.id() != id {
            let produced = populated.node.id().clone();
            populated.node.set_id(id.clone());
            for prop in &mut populated.properties {
                if prop.parent() == &produced {
                    prop.set_parent(id.clone());
                }
            }
        }
        self.count_virtual(id);
        Ok(populated)
    }

    async fn populate_external(&mut self, mut populated: Populated) -> Result<Populated> {
        let classification = classify_node(&populated.node, &self.registry);
        if !classification.is_external() {
            return Ok(populated);
        }
        let Some(provider) = self
            .registry
            .lookup_by_type(populated.node.node_type())
            .cloned()
        else {
            return Ok(populated);
        };

        let id = populated.node.id().clone();
        if classification.is_virtual() {
            // Synthetic children from the recipe provider are stale once the
            // type provider regenerates this node
            populated.node.remove_all_children();
        }

        let ctx = PopulateContext::new(
            self.storage.clone(),
            id.parameters().map(str::to_string),
        );
        let provider_name = provider.name().to_string();
        let node_id = id.to_string();
        debug!("Populating external node {node_id} with provider {provider_name}");
        match provider.populate_external(&ctx, populated.node).await {
            Ok(mut decorated) => {
                decorated.node.set_id(id);
                let mut properties = populated.properties;
                properties.append(&mut decorated.properties);
                Ok(Populated {
                    node: decorated.node,
                    properties,
                })
            }
            Err(err) => Err(self.population_failed(&id, provider_name, err)),
        }
    }

    fn population_failed(&self, id: &NodeId, provider: String, err: anyhow::Error) -> Error {
        let node_id = id.to_string();
        let message = format!("{err:#}");
        error!("Provider {provider} failed to populate {node_id}: {message}");
        Error::not_found(id)
    }

    fn count_virtual(&mut self, id: &NodeId) {
        if !self.virtual_states.insert(ItemId::from(id)) {
            return;
        }
        self.counters.virtual_states += 1;
        if self.counters.virtual_states == self.thresholds.virtual_states + 1 {
            let ceiling = self.thresholds.virtual_states;
            warn!("Session exceeded {ceiling} virtual states in one edit cycle");
        }
        if id.parameters().is_some() {
            self.counters.parameterized_views += 1;
            if self.counters.parameterized_views == self.thresholds.parameterized_views + 1 {
                let ceiling = self.thresholds.parameterized_views;
                warn!("Session exceeded {ceiling} parameterized views in one edit cycle");
            }
        }
    }

    fn cache(&mut self, populated: Populated) -> Arc<NodeState> {
        let Populated { node, properties } = populated;
        for prop in properties {
            _ = self.properties.insert(prop.id().clone(), Arc::new(prop));
        }
        let node = Arc::new(node);
        _ = self.nodes.insert(node.id().clone(), node.clone());
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ParameterizedId;
    use crate::memory_persistence::MemoryStorage;
    use crate::persistence::AllowAll;
    use crate::provider::VirtualProvider;
    use crate::state::Value;
    use crate::testing::{
        FACET_COUNT, FACET_QUERY, FacetProvider, FailingProvider, NestedSearchProvider,
        facet_search_node, plain_node,
    };

    struct Fixture {
        storage: MemoryStorage,
        facets: Arc<FacetProvider>,
        failing: Arc<FailingProvider>,
        deleted: Arc<DeletedExternals>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: MemoryStorage::new(),
                facets: FacetProvider::colors(),
                failing: FailingProvider::new(),
                deleted: Arc::new(DeletedExternals::with_capacity(8).unwrap()),
            }
        }

        fn engine(&self, config: &ManagerConfig) -> PopulationEngine {
            let facets: Arc<dyn VirtualProvider> = self.facets.clone();
            let failing: Arc<dyn VirtualProvider> = self.failing.clone();
            PopulationEngine::new(
                Arc::new(ProviderRegistry::with_providers([facets, failing])),
                Arc::new(self.storage.clone()),
                Arc::new(AllowAll),
                self.deleted.clone(),
                config,
            )
        }
    }

    struct DenyAll;

    impl AccessManager for DenyAll {
        fn can_read(&self, _id: &ItemId) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_external_node_decorated() {
        let fx = Fixture::new();
        let search = facet_search_node(None);
        fx.storage.insert_node(search.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());

        let node = engine.resolve_node(search.id()).await.unwrap();
        let children: Vec<&str> = node.children().iter().map(|c| c.name()).collect();
        assert_eq!(children, vec!["red", "blue"]);
        assert!(node.property_names().contains(FACET_COUNT));

        let count = engine
            .resolve_property(&PropertyId::new(search.id().clone(), FACET_COUNT))
            .await
            .unwrap();
        assert_eq!(count.value(), Some(&Value::Long(2)));
        // The count came from the cache, not a second population
        assert_eq!(fx.facets.external_calls(), 1);
    }

    #[tokio::test]
    async fn test_repeated_resolve_is_same_instance() {
        let fx = Fixture::new();
        let search = facet_search_node(None);
        fx.storage.insert_node(search.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());
        let bucket = FacetProvider::bucket_id(search.id(), "red");

        let first = engine.resolve_node(&bucket).await.unwrap();
        let second = engine.resolve_node(&bucket).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.facets.populate_calls(), 1);
        assert_eq!(engine.counters().virtual_states, 1);
    }

    #[tokio::test]
    async fn test_parameterized_views_cached_separately() {
        let fx = Fixture::new();
        let source = plain_node(None);
        fx.storage.insert_node(source.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());
        let base = VirtualId::from_parts("facets", source.id().clone(), "red");
        let v1 = NodeId::from(ParameterizedId::new(base.clone(), "q=test"));
        let v2 = NodeId::from(base.clone().with_parameters("q=test"));
        let other = NodeId::from(base.with_parameters("q=other"));

        assert_eq!(v1, v2);
        let first = engine.resolve_node(&v1).await.unwrap();
        let second = engine.resolve_node(&v2).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), &v1);

        let query = engine
            .resolve_property(&PropertyId::new(v1.clone(), FACET_QUERY))
            .await
            .unwrap();
        assert_eq!(query.value(), Some(&Value::from("q=test")));

        _ = engine.resolve_node(&other).await.unwrap();
        assert_eq!(fx.facets.populate_calls(), 2);
        assert_eq!(engine.counters().parameterized_views, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_found() {
        let fx = Fixture::new();
        let broken = NodeState::new(NodeId::new_regular(), None, crate::testing::FAILING_TYPE);
        fx.storage.insert_node(broken.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());

        let err = engine.resolve_node(broken.id()).await.unwrap_err();
        assert_eq!(err, Error::not_found(broken.id()));

        // Unknown facet value and unknown provider both read as missing
        let missing = FacetProvider::bucket_id(broken.id(), "green");
        assert!(engine.resolve_node(&missing).await.unwrap_err().is_not_found());
        let unknown = NodeId::from(VirtualId::from_parts("mirror", broken.id().clone(), "x"));
        assert!(engine.resolve_node(&unknown).await.unwrap_err().is_not_found());

        // Failures are not cached, so a second attempt asks again
        _ = engine.resolve_node(broken.id()).await.unwrap_err();
        assert_eq!(fx.failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_access_denied_is_not_found() {
        let fx = Fixture::new();
        let node = plain_node(None);
        fx.storage.insert_node(node.clone()).await;
        fx.storage.deny(node.id().into()).await;
        let mut engine = fx.engine(&ManagerConfig::default());
        assert_eq!(
            engine.resolve_node(node.id()).await,
            Err(Error::not_found(node.id()))
        );

        let search = facet_search_node(None);
        fx.storage.insert_node(search.clone()).await;
        let mut denied = PopulationEngine::new(
            engine.registry().clone(),
            Arc::new(fx.storage.clone()),
            Arc::new(DenyAll),
            fx.deleted.clone(),
            &ManagerConfig::default(),
        );
        let bucket = FacetProvider::bucket_id(search.id(), "red");
        assert!(denied.resolve_node(search.id()).await.unwrap_err().is_not_found());
        assert!(denied.resolve_node(&bucket).await.unwrap_err().is_not_found());
        assert_eq!(fx.facets.calls(), 0);
    }

    #[tokio::test]
    async fn test_clear_forces_repopulation() {
        let fx = Fixture::new();
        let search = facet_search_node(None);
        fx.storage.insert_node(search.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());

        let before = engine.resolve_node(search.id()).await.unwrap();
        engine.clear();
        assert!(!engine.is_cached(search.id()));
        let after = engine.resolve_node(search.id()).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(fx.facets.external_calls(), 2);
    }

    #[tokio::test]
    async fn test_virtual_external_children_regenerated() {
        let fx = Fixture::new();
        let source = plain_node(None);
        fx.storage.insert_node(source.clone()).await;

        // A recipe provider producing a node of a registered external type
        let facets: Arc<dyn VirtualProvider> = fx.facets.clone();
        let nested: Arc<dyn VirtualProvider> = NestedSearchProvider::new();
        let mut engine = PopulationEngine::new(
            Arc::new(ProviderRegistry::with_providers([facets, nested])),
            Arc::new(fx.storage.clone()),
            Arc::new(AllowAll),
            fx.deleted.clone(),
            &ManagerConfig::default(),
        );

        let id = NestedSearchProvider::search_id(source.id());
        let node = engine.resolve_node(&id).await.unwrap();
        let children: Vec<&str> = node.children().iter().map(|c| c.name()).collect();
        assert_eq!(children, vec!["red", "blue"]);
    }

    #[tokio::test]
    async fn test_deleted_external_not_resurrected() {
        let fx = Fixture::new();
        let search = facet_search_node(None);
        fx.storage.insert_node(search.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());

        assert!(fx.deleted.mark(search.id()));
        assert!(engine.repopulate(search.id()).await.unwrap_err().is_not_found());
        assert_eq!(fx.facets.calls(), 0);
    }

    #[tokio::test]
    async fn test_deleted_record_only_hides_stored_ids() {
        let fx = Fixture::new();
        let source = plain_node(None);
        fx.storage.insert_node(source.clone()).await;
        let mut engine = fx.engine(&ManagerConfig::default());
        let bucket = FacetProvider::bucket_id(source.id(), "red");

        // A virtual id in the record does not stop the provider
        assert!(fx.deleted.mark(&bucket));
        assert!(engine.resolve_node(&bucket).await.is_ok());
        assert_eq!(fx.facets.populate_calls(), 1);
    }

    #[tokio::test]
    async fn test_threshold_only_flags() {
        let fx = Fixture::new();
        let source = plain_node(None);
        fx.storage.insert_node(source.clone()).await;
        let config = ManagerConfig {
            virtual_state_threshold: 1,
            ..ManagerConfig::default()
        };
        let mut engine = fx.engine(&config);

        _ = engine
            .resolve_node(&FacetProvider::bucket_id(source.id(), "red"))
            .await
            .unwrap();
        assert!(!engine.exceeds_threshold());
        _ = engine
            .resolve_node(&FacetProvider::bucket_id(source.id(), "blue"))
            .await
            .unwrap();
        assert!(engine.exceeds_threshold());

        engine.clear();
        assert!(!engine.exceeds_threshold());
        engine.record_changelog(config.changelog_threshold + 1);
        assert!(engine.exceeds_threshold());
    }
}
