// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Session-facing item-state manager
//!
//! [`VirtualLayer`] holds what all sessions of one repository share: the
//! storage layer, the access check, the provider registry and the record of
//! deleted externals. Each session gets its own [`VirtualStateManager`]
//! with a private population cache and pending change log.
//!
//! Edit cycle:
//!
//! ```text
//! edit() -> create/store/destroy ... -> update()
//!                                         |- look up stored external parents
//!                                         |- clear population cache
//!                                         |- filter change log
//!                                         |- store filtered change log
//!                                         |- forget re-created deleted externals
//!                                         `- repopulate modified externals
//! ```

use crate::change_log::{ChangeLog, ChangeLogBuilder};
use crate::classify::{Classification, classify_node, is_virtual_property};
use crate::config::ManagerConfig;
use crate::deleted_externals::DeletedExternals;
use crate::error::{Error, Result};
use crate::filter::FilteredChangeLog;
use crate::id::{ItemId, NodeId, PropertyId};
use crate::persistence::{AccessManager, AllowAll, StorageLayer};
use crate::population::{PopulationEngine, ThresholdCounters};
use crate::provider::ProviderRegistry;
use crate::state::{ItemState, NodeState, PropertyState};
use diagnostics::{debug, info, warn};
use indexmap::IndexSet;
use std::sync::Arc;

/// Repository-wide parts of the virtual layer
#[derive(Clone)]
pub struct VirtualLayer {
    storage: Arc<dyn StorageLayer>,
    access: Arc<dyn AccessManager>,
    registry: Arc<ProviderRegistry>,
    deleted_externals: Arc<DeletedExternals>,
    config: ManagerConfig,
}

impl VirtualLayer {
    pub fn new(
        storage: Arc<dyn StorageLayer>,
        registry: ProviderRegistry,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let deleted_externals = DeletedExternals::with_capacity(config.deleted_externals_capacity)?;
        Ok(Self {
            storage,
            access: Arc::new(AllowAll),
            registry: Arc::new(registry),
            deleted_externals: Arc::new(deleted_externals),
            config,
        })
    }

    #[must_use]
    pub fn with_access_manager(mut self, access: Arc<dyn AccessManager>) -> Self {
        self.access = access;
        self
    }

    /// Open a new session
    #[must_use]
    pub fn session(&self) -> VirtualStateManager {
        VirtualStateManager::new(self)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn deleted_externals(&self) -> &Arc<DeletedExternals> {
        &self.deleted_externals
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

/// Outcome of a successful [`VirtualStateManager::update`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Entries handed to the storage layer
    pub forwarded: usize,
    /// Virtual entries dropped by the filter
    pub discarded: usize,
    /// External nodes repopulated after the commit
    pub repopulated: usize,
    /// External nodes newly recorded as deleted
    pub deleted_externals: usize,
}

/// One session's view of the repository
pub struct VirtualStateManager {
    storage: Arc<dyn StorageLayer>,
    registry: Arc<ProviderRegistry>,
    deleted_externals: Arc<DeletedExternals>,
    engine: PopulationEngine,
    pending: Option<ChangeLogBuilder>,
    // Outstanding disable_virtual_layer calls
    disabled: usize,
    changelog_threshold: usize,
}

impl VirtualStateManager {
    fn new(layer: &VirtualLayer) -> Self {
        let engine = PopulationEngine::new(
            layer.registry.clone(),
            layer.storage.clone(),
            layer.access.clone(),
            layer.deleted_externals.clone(),
            &layer.config,
        );
        Self {
            storage: layer.storage.clone(),
            registry: layer.registry.clone(),
            deleted_externals: layer.deleted_externals.clone(),
            engine,
            pending: None,
            disabled: 0,
            changelog_threshold: layer.config.changelog_threshold,
        }
    }

    /// Open an edit scope. Calling it again inside a scope does nothing.
    pub fn edit(&mut self) {
        if self.pending.is_none() {
            debug!("Opening edit scope");
            self.pending = Some(ChangeLogBuilder::new());
        }
    }

    #[must_use]
    pub fn in_edit_mode(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the edit scope and its transient changes without touching storage
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            let dropped = pending.len();
            debug!("Cancelled edit scope with {dropped} transient changes");
        }
    }

    /// Discard transient changes and everything cached. An open edit scope
    /// stays open, empty.
    pub fn refresh(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            *pending = ChangeLogBuilder::new();
        }
        self.engine.clear();
    }

    pub async fn get_node(&mut self, id: &NodeId) -> Result<Arc<NodeState>> {
        let item = ItemId::from(id);
        if let Some(pending) = &self.pending {
            if pending.is_deleted(&item) {
                return Err(Error::NotFound(item));
            }
            if let Some(ItemState::Node(node)) = pending.get(&item) {
                return Ok(Arc::new(node.clone()));
            }
        }

        if !self.is_virtual_layer_enabled() {
            return self.engine.load_unpopulated(id).await.map(Arc::new);
        }
        self.engine.resolve_node(id).await
    }

    pub async fn get_property(&mut self, id: &PropertyId) -> Result<Arc<PropertyState>> {
        let item = ItemId::from(id);
        if let Some(pending) = &self.pending {
            if pending.is_deleted(&item) {
                return Err(Error::NotFound(item));
            }
            if let Some(ItemState::Property(prop)) = pending.get(&item) {
                return Ok(Arc::new(prop.clone()));
            }
        }

        if !self.is_virtual_layer_enabled() && is_virtual_property(id, &self.registry) {
            return Err(Error::NotFound(item));
        }
        self.engine.resolve_property(id).await
    }

    /// Whether `id` can be read by this session
    pub async fn has_item(&mut self, id: &ItemId) -> Result<bool> {
        let found = match id {
            ItemId::Node(id) => self.get_node(id).await.map(|_| ()),
            ItemId::Property(id) => self.get_property(id).await.map(|_| ()),
        };
        match found {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The stored node a (possibly virtual) id ultimately derives from,
    /// without any provider decoration
    pub async fn canonical_state(&mut self, id: &NodeId) -> Result<NodeState> {
        let mut current = id;
        while let Some(recipe) = current.recipe() {
            current = recipe.source();
        }
        self.engine.load_unpopulated(current).await
    }

    /// Record a new item in the edit scope
    pub async fn create(&mut self, state: ItemState) -> Result<()> {
        if self.pending.is_none() {
            return Err(Error::NotInEditMode);
        }
        let id = state.id();
        let exists_in_storage = match &id {
            ItemId::Node(node) if node.is_regular() => self.storage.exists(&id).await?,
            ItemId::Property(prop) if prop.parent().is_regular() => {
                self.storage.exists(&id).await?
            }
            _ => false,
        };

        let pending = self.pending.as_mut().ok_or(Error::NotInEditMode)?;
        if pending.get(&id).is_some() || (exists_in_storage && !pending.is_deleted(&id)) {
            return Err(Error::AlreadyExists(id));
        }
        pending.added(state);
        Ok(())
    }

    /// Record a modification. `state` carries the modification count of the
    /// version it was derived from.
    pub fn store(&mut self, state: ItemState) -> Result<()> {
        let pending = self.pending.as_mut().ok_or(Error::NotInEditMode)?;
        pending.modified(state);
        Ok(())
    }

    pub fn destroy(&mut self, state: ItemState) -> Result<()> {
        let pending = self.pending.as_mut().ok_or(Error::NotInEditMode)?;
        pending.deleted(state);
        Ok(())
    }

    /// Commit the edit scope.
    ///
    /// The scope ends whether or not the storage layer accepts the change
    /// log. Stale and referential-integrity failures are returned as-is;
    /// after a stale failure the session should `refresh` and redo its
    /// changes.
    pub async fn update(&mut self) -> Result<UpdateSummary> {
        let pending = self.pending.take().ok_or(Error::NotInEditMode)?;
        let upstream = pending.build();
        let stored_externals = self.stored_external_parents(&upstream).await?;

        self.engine.clear();
        self.engine.record_changelog(upstream.len());

        let filtered = FilteredChangeLog::filter_with_stored_externals(
            upstream,
            &self.registry,
            &self.deleted_externals,
            &stored_externals,
        );
        let forwarded = filtered.forwarded().len();
        let discarded = filtered.discarded();

        if !filtered.forwarded().is_empty() {
            if let Err(err) = self.storage.store(filtered.forwarded()).await {
                // Nothing was deleted after all
                for id in filtered.deleted_externals() {
                    _ = self.deleted_externals.forget(id);
                }
                let reason = err.to_string();
                warn!("Commit of {forwarded} items failed: {reason}");
                return Err(err);
            }
        }
        self.forget_recreated(filtered.forwarded());

        let repopulated = filtered.repopulate(&mut self.engine).await;
        let summary = UpdateSummary {
            forwarded,
            discarded,
            repopulated,
            deleted_externals: filtered.deleted_externals().len(),
        };
        info!(
            "Committed {forwarded} items, discarded {discarded} virtual items, repopulated {repopulated} externals"
        );
        Ok(summary)
    }

    /// Stored external nodes that are not in `upstream` themselves but have
    /// something changed beneath them
    async fn stored_external_parents(&self, upstream: &ChangeLog) -> Result<IndexSet<NodeId>> {
        let mut externals = IndexSet::new();
        for parent in upstream.changed_parents() {
            if !parent.is_regular() || upstream.contains_node(parent) {
                continue;
            }
            let node = match self.engine.load_unpopulated(parent).await {
                Ok(node) => node,
                Err(Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if classify_node(&node, &self.registry) == Classification::EXTERNAL {
                _ = externals.insert(parent.clone());
            }
        }
        Ok(externals)
    }

    /// A committed node reusing the id of a deleted external is readable again
    fn forget_recreated(&self, committed: &ChangeLog) {
        let added = committed
            .added()
            .iter()
            .filter_map(ItemState::as_node)
            .map(NodeState::id)
            .filter(|id| id.is_regular());
        for id in added {
            if self.deleted_externals.forget(id) {
                let node_id = id.to_string();
                debug!("Node {node_id} was created again, no longer deleted");
            }
        }
    }

    /// Bypass the virtual layer until the matching enable call. Nested
    /// pairs compose.
    pub fn disable_virtual_layer(&mut self) {
        self.disabled += 1;
    }

    pub fn enable_virtual_layer(&mut self) {
        if self.disabled == 0 {
            warn!("Virtual layer enabled without a matching disable");
            return;
        }
        self.disabled -= 1;
    }

    #[must_use]
    pub fn is_virtual_layer_enabled(&self) -> bool {
        self.disabled == 0
    }

    /// Whether this edit cycle crossed any configured ceiling
    #[must_use]
    pub fn exceeds_threshold(&self) -> bool {
        let pending = self.pending.as_ref().map_or(0, ChangeLogBuilder::len);
        pending > self.changelog_threshold || self.engine.exceeds_threshold()
    }

    #[must_use]
    pub fn counters(&self) -> ThresholdCounters {
        self.engine.counters()
    }

    /// Whether `id` was populated or loaded in the current cycle
    #[must_use]
    pub fn is_cached(&self, id: &NodeId) -> bool {
        self.engine.is_cached(id)
    }
}
