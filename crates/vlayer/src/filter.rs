// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Commit-time filtering of change logs
//!
//! Storage must never see virtual content. [`FilteredChangeLog::filter`]
//! takes the raw change log of an edit cycle and decides for every entry
//! whether it is forwarded, forwarded with its synthetic parts stripped, or
//! dropped:
//!
//! | entry                        | added               | modified                 | deleted               |
//! |------------------------------|---------------------|--------------------------|-----------------------|
//! | virtual node or property     | dropped             | dropped                  | dropped               |
//! | external node (regular id)   | stripped            | stripped if real changes | children cleared      |
//! |                              |                     | beneath, else dropped    | and recorded          |
//! | external node (virtual id)   | dropped             | dropped                  | dropped, not recorded |
//! | anything else                | forwarded           | forwarded                | forwarded             |
//!
//! Forwarded nodes always lose child entries pointing at virtual nodes and
//! names of virtual properties. Surviving entries keep their upstream order.
//!
//! External nodes with real changes beneath them are scheduled for
//! repopulation, which runs once the storage layer accepted the commit.
//! That includes stored externals that are not in the change log
//! themselves but had a property or child changed; the caller looks those
//! up in storage and passes them to
//! [`FilteredChangeLog::filter_with_stored_externals`].

use crate::change_log::ChangeLog;
use crate::classify::{Classification, classify, classify_node, is_virtual_property};
use crate::deleted_externals::DeletedExternals;
use crate::id::{ItemId, NodeId, PropertyId};
use crate::population::PopulationEngine;
use crate::provider::ProviderRegistry;
use crate::state::{ItemState, NodeState};
use diagnostics::{debug, warn};
use indexmap::IndexSet;
use std::collections::HashSet;

/// What happened to one change-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    FilteredOut,
    Forwarded,
    RepopulateScheduled,
}

#[derive(Debug, Default)]
pub struct FilteredChangeLog {
    forwarded: ChangeLog,
    deleted_externals: Vec<NodeId>,
    modified_externals: IndexSet<NodeId>,
    discarded: usize,
}

impl FilteredChangeLog {
    /// Filter `upstream`. Deleted externals not yet in `shared` are recorded
    /// there and in this filter's own list.
    #[must_use]
    pub fn filter(
        upstream: ChangeLog,
        registry: &ProviderRegistry,
        shared: &DeletedExternals,
    ) -> Self {
        Self::filter_with_stored_externals(upstream, registry, shared, &IndexSet::new())
    }

    /// Like [`filter`](Self::filter). `stored_externals` are stored external
    /// nodes absent from `upstream` with changes beneath them; each one with
    /// a real change is scheduled for repopulation after the entries of the
    /// log itself.
    #[must_use]
    pub fn filter_with_stored_externals(
        upstream: ChangeLog,
        registry: &ProviderRegistry,
        shared: &DeletedExternals,
        stored_externals: &IndexSet<NodeId>,
    ) -> Self {
        // Needs the upstream index, so collect before consuming
        let with_real_changes = externals_with_real_changes(&upstream, registry);
        let untouched: Vec<NodeId> = stored_externals
            .iter()
            .filter(|id| id.is_regular() && !upstream.contains_node(id))
            .filter(|id| has_real_change_under(&upstream, id, registry))
            .cloned()
            .collect();
        let (added, modified, deleted) = upstream.into_parts();

        let mut filter = Self::default();
        let mut added_out = Vec::with_capacity(added.len());
        let mut modified_out = Vec::with_capacity(modified.len());
        let mut deleted_out = Vec::with_capacity(deleted.len());

        for state in added {
            let disposition = filter.added(state, registry, &with_real_changes, &mut added_out);
            filter.tally(disposition);
        }
        for state in modified {
            let disposition =
                filter.modified(state, registry, &with_real_changes, &mut modified_out);
            filter.tally(disposition);
        }
        for state in deleted {
            let disposition = filter.deleted(state, registry, shared, &mut deleted_out);
            filter.tally(disposition);
        }

        for id in untouched {
            _ = filter.modified_externals.insert(id);
        }

        filter.forwarded = ChangeLog::new(added_out, modified_out, deleted_out);
        filter
    }

    fn added(
        &mut self,
        state: ItemState,
        registry: &ProviderRegistry,
        with_real_changes: &HashSet<NodeId>,
        out: &mut Vec<ItemState>,
    ) -> Disposition {
        let classification = classify(&state, registry);
        if classification.is_virtual() {
            log_dropped("added", &state);
            return Disposition::FilteredOut;
        }
        out.push(strip_synthetic(state, registry));
        self.schedule_if_changed(classification, out, with_real_changes)
    }

    fn modified(
        &mut self,
        state: ItemState,
        registry: &ProviderRegistry,
        with_real_changes: &HashSet<NodeId>,
        out: &mut Vec<ItemState>,
    ) -> Disposition {
        let classification = classify(&state, registry);
        if classification.is_virtual() {
            log_dropped("modified", &state);
            return Disposition::FilteredOut;
        }
        if classification.is_external() {
            let id = state.id();
            let real = id.as_node().is_some_and(|id| with_real_changes.contains(id));
            if !real {
                // Only the synthetic part of this node changed
                log_dropped("modified", &state);
                return Disposition::FilteredOut;
            }
        }
        out.push(strip_synthetic(state, registry));
        self.schedule_if_changed(classification, out, with_real_changes)
    }

    fn deleted(
        &mut self,
        mut state: ItemState,
        registry: &ProviderRegistry,
        shared: &DeletedExternals,
        out: &mut Vec<ItemState>,
    ) -> Disposition {
        let classification = classify(&state, registry);
        if classification.is_external() {
            if let Some(node) = state.as_node_mut() {
                // Virtual ids never reach storage, so there is nothing to
                // keep out for other sessions
                if node.id().is_regular() && shared.mark(node.id()) {
                    self.deleted_externals.push(node.id().clone());
                }
                node.remove_all_children();
            }
        }
        if classification.is_virtual() {
            log_dropped("deleted", &state);
            return Disposition::FilteredOut;
        }
        out.push(strip_synthetic(state, registry));
        Disposition::Forwarded
    }

    fn schedule_if_changed(
        &mut self,
        classification: Classification,
        out: &[ItemState],
        with_real_changes: &HashSet<NodeId>,
    ) -> Disposition {
        let scheduled = classification.is_external()
            && out
                .last()
                .and_then(ItemState::as_node)
                .map(NodeState::id)
                .filter(|id| with_real_changes.contains(*id))
                .is_some_and(|id| self.modified_externals.insert(id.clone()));
        if scheduled {
            Disposition::RepopulateScheduled
        } else {
            Disposition::Forwarded
        }
    }

    fn tally(&mut self, disposition: Disposition) {
        if disposition == Disposition::FilteredOut {
            self.discarded += 1;
        }
    }

    /// The change log that may reach storage
    #[must_use]
    pub fn forwarded(&self) -> &ChangeLog {
        &self.forwarded
    }

    #[must_use]
    pub fn into_forwarded(self) -> ChangeLog {
        self.forwarded
    }

    /// External nodes newly recorded as deleted by this filter
    #[must_use]
    pub fn deleted_externals(&self) -> &[NodeId] {
        &self.deleted_externals
    }

    /// External nodes to repopulate once the commit succeeded
    #[must_use]
    pub fn modified_externals(&self) -> impl Iterator<Item = &NodeId> {
        self.modified_externals.iter()
    }

    #[must_use]
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Repopulate every scheduled external. Runs after a successful commit,
    /// so failures are logged and skipped. Returns how many were repopulated.
    pub async fn repopulate(&self, engine: &mut PopulationEngine) -> usize {
        let mut repopulated = 0;
        for id in &self.modified_externals {
            match engine.repopulate(id).await {
                Ok(_) => repopulated += 1,
                Err(err) => {
                    let node_id = id.to_string();
                    let reason = err.to_string();
                    warn!("Skipped repopulation of {node_id}: {reason}");
                }
            }
        }
        repopulated
    }
}

/// External (non-virtual) nodes that have a stored item added, deleted or
/// modified directly beneath them
fn externals_with_real_changes(
    upstream: &ChangeLog,
    registry: &ProviderRegistry,
) -> HashSet<NodeId> {
    upstream
        .added()
        .iter()
        .chain(upstream.modified())
        .filter_map(ItemState::as_node)
        .filter(|node| classify_node(node, registry) == Classification::EXTERNAL)
        .filter(|node| has_real_change_under(upstream, node.id(), registry))
        .map(|node| node.id().clone())
        .collect()
}

fn has_real_change_under(upstream: &ChangeLog, id: &NodeId, registry: &ProviderRegistry) -> bool {
    upstream
        .changes_under(id)
        .iter()
        .any(|item| !is_synthetic_item(item, registry))
}

fn is_synthetic_item(id: &ItemId, registry: &ProviderRegistry) -> bool {
    match id {
        ItemId::Node(id) => id.is_virtual(),
        ItemId::Property(id) => is_virtual_property(id, registry),
    }
}

/// Remove child entries of virtual nodes and names of virtual properties
fn strip_synthetic(mut state: ItemState, registry: &ProviderRegistry) -> ItemState {
    if let Some(node) = state.as_node_mut() {
        let parent = node.id().clone();
        let dropped = node.retain_children(|entry| !entry.id().is_virtual());
        node.retain_property_names(|name| {
            !is_virtual_property(&PropertyId::new(parent.clone(), name.as_str()), registry)
        });
        if dropped > 0 {
            let node_id = parent.to_string();
            debug!("Pruned {dropped} virtual child entries from {node_id}");
        }
    }
    state
}

fn log_dropped(category: &str, state: &ItemState) {
    let item = state.id().to_string();
    debug!("Dropped {category} virtual item {item}");
}
