#![allow(missing_docs)]

use anyhow::Result;
use std::sync::Arc;
use vlayer::testing::{
    FACET_COUNT, FACET_PROVIDER, FACET_SEARCH_TYPE, FacetProvider, NestedSearchProvider,
    facet_search_node, plain_node,
};
use vlayer::{
    Error, ItemId, ItemState, ManagerConfig, MemoryStorage, NodeId, NodeState, PropertyId,
    PropertyState, ProviderRegistry, Value, VirtualId, VirtualLayer, VirtualProvider,
};

struct Repo {
    storage: MemoryStorage,
    facets: Arc<FacetProvider>,
    layer: VirtualLayer,
}

fn repo() -> Result<Repo> {
    repo_with_config(ManagerConfig::default())
}

fn repo_with_config(config: ManagerConfig) -> Result<Repo> {
    diagnostics::init();
    let storage = MemoryStorage::new();
    let facets = FacetProvider::colors();
    let provider: Arc<dyn VirtualProvider> = facets.clone();
    let layer = VirtualLayer::new(
        Arc::new(storage.clone()),
        ProviderRegistry::with_providers([provider]),
        config,
    )?;
    Ok(Repo {
        storage,
        facets,
        layer,
    })
}

/// External node is decorated on first read and populated afresh after a commit
#[tokio::test]
async fn test_external_repopulated_after_commit() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    let other = plain_node(None);
    repo.storage.insert_node(search.clone()).await;
    repo.storage.insert_node(other.clone()).await;
    let mut session = repo.layer.session();

    let decorated = session.get_node(search.id()).await?;
    assert_eq!(decorated.children().len(), 2);
    assert_eq!(
        decorated.children()[0].id(),
        &FacetProvider::bucket_id(search.id(), "red")
    );
    assert_eq!(repo.facets.external_calls(), 1);

    // Reading again in the same cycle is a cache hit
    let again = session.get_node(search.id()).await?;
    assert!(Arc::ptr_eq(&decorated, &again));
    assert_eq!(repo.facets.external_calls(), 1);

    session.edit();
    let modified = (*session.get_node(other.id()).await?).clone().with_mixin("mix:title");
    session.store(modified.into())?;
    let summary = session.update().await?;
    assert_eq!(summary.forwarded, 1);

    let fresh = session.get_node(search.id()).await?;
    assert!(!Arc::ptr_eq(&decorated, &fresh));
    assert_eq!(fresh.children().len(), 2);
    assert_eq!(repo.facets.external_calls(), 2);

    // Storage never saw the synthetic children
    let stored = repo.storage.stored_node(search.id()).await;
    assert_eq!(stored.map(|n| n.children().len()), Some(0));
    Ok(())
}

/// Two parameterized ids built from the same recipe name the same view
#[tokio::test]
async fn test_parameterized_view_cache_hit() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut session = repo.layer.session();

    let v1 = NodeId::from(
        VirtualId::from_parts(FACET_PROVIDER, search.id().clone(), "red").with_parameters("q=test"),
    );
    let v2 = NodeId::from(
        VirtualId::from_parts(FACET_PROVIDER, search.id().clone(), "red").with_parameters("q=test"),
    );
    assert_eq!(v1, v2);

    let first = session.get_node(&v1).await?;
    let second = session.get_node(&v2).await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(repo.facets.populate_calls(), 1);
    assert_eq!(session.counters().parameterized_views, 1);
    Ok(())
}

/// An added external whose stored property changed in the same commit is
/// repopulated once the commit went through
#[tokio::test]
async fn test_added_external_repopulated() -> Result<()> {
    let repo = repo()?;
    let mut session = repo.layer.session();
    let mut search = facet_search_node(None);
    search.add_property_name("title");
    let title = PropertyState::single(PropertyId::new(search.id().clone(), "title"), "colors");

    session.edit();
    session.create(search.clone().into()).await?;
    session.create(title.into()).await?;
    let summary = session.update().await?;

    assert_eq!(summary.forwarded, 2);
    assert_eq!(summary.repopulated, 1);
    assert!(session.is_cached(search.id()));
    assert_eq!(repo.facets.external_calls(), 1);

    let node = session.get_node(search.id()).await?;
    assert_eq!(node.children().len(), 2);
    assert!(node.property_names().contains(FACET_COUNT));
    assert_eq!(repo.facets.external_calls(), 1);

    let stored = repo.storage.stored_node(search.id()).await;
    let stored = stored.ok_or_else(|| anyhow::anyhow!("external node was not stored"))?;
    assert!(stored.children().is_empty());
    assert!(!stored.property_names().contains(FACET_COUNT));
    Ok(())
}

/// Changing a stored property repopulates its stored external parent even
/// though the parent itself was never written
#[tokio::test]
async fn test_property_change_repopulates_stored_external() -> Result<()> {
    let repo = repo()?;
    let mut search = facet_search_node(None);
    search.add_property_name("title");
    let title = PropertyState::single(PropertyId::new(search.id().clone(), "title"), "colors");
    repo.storage.insert_node(search.clone()).await;
    repo.storage.insert_property(title.clone()).await;
    let mut session = repo.layer.session();

    _ = session.get_node(search.id()).await?;
    assert_eq!(repo.facets.external_calls(), 1);

    session.edit();
    let mut renamed = PropertyState::clone(&*session.get_property(title.id()).await?);
    renamed.set_values(vec![Value::from("shades")]);
    session.store(renamed.into())?;
    let summary = session.update().await?;

    assert_eq!(summary.forwarded, 1);
    assert_eq!(summary.repopulated, 1);
    assert!(session.is_cached(search.id()));
    assert_eq!(repo.facets.external_calls(), 2);

    let stored = session.get_property(title.id()).await?;
    assert_eq!(stored.value(), Some(&Value::from("shades")));
    Ok(())
}

#[tokio::test]
async fn test_cache_reset_at_update() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut session = repo.layer.session();
    let bucket = FacetProvider::bucket_id(search.id(), "blue");

    let before = session.get_node(&bucket).await?;
    session.edit();
    let summary = session.update().await?;
    assert_eq!(summary.forwarded, 0);
    assert_eq!(repo.storage.commit_count().await, 0);

    let after = session.get_node(&bucket).await?;
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(*before, *after);
    assert_eq!(repo.facets.populate_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_virtual_edits_never_stored() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut session = repo.layer.session();

    let bucket = (*session.get_node(&FacetProvider::bucket_id(search.id(), "red")).await?).clone();
    let count = PropertyState::single(
        PropertyId::new(search.id().clone(), FACET_COUNT),
        Value::Long(7),
    );

    session.edit();
    session.store(bucket.with_mixin("mix:title").into())?;
    session.store(count.into())?;
    // Decorated external with nothing real beneath it
    let decorated = (*session.get_node(search.id()).await?).clone();
    session.store(decorated.into())?;
    let summary = session.update().await?;

    assert_eq!(summary.forwarded, 0);
    assert_eq!(summary.discarded, 3);
    assert_eq!(repo.storage.commit_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_deleted_external_recorded_once() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut writer = repo.layer.session();
    let mut reader = repo.layer.session();

    let cached = reader.get_node(search.id()).await?;
    assert_eq!(cached.children().len(), 2);

    writer.edit();
    let populated = writer.get_node(search.id()).await?;
    writer.destroy(ItemState::from((*populated).clone()))?;
    let summary = writer.update().await?;

    assert_eq!(summary.forwarded, 1);
    assert_eq!(summary.deleted_externals, 1);
    assert!(repo.layer.deleted_externals().contains(search.id()));
    assert_eq!(repo.storage.node_count().await, 0);

    // The other session keeps its cycle's view until it refreshes
    assert!(reader.get_node(search.id()).await.is_ok());
    reader.refresh();
    assert!(!reader.has_item(&ItemId::from(search.id())).await?);
    Ok(())
}

/// Discarding a synthetic external in one session leaves it readable in others
#[tokio::test]
async fn test_virtual_external_deletion_is_session_local() -> Result<()> {
    diagnostics::init();
    let storage = MemoryStorage::new();
    let facets: Arc<dyn VirtualProvider> = FacetProvider::colors();
    let nested: Arc<dyn VirtualProvider> = NestedSearchProvider::new();
    let layer = VirtualLayer::new(
        Arc::new(storage.clone()),
        ProviderRegistry::with_providers([facets, nested]),
        ManagerConfig::default(),
    )?;
    let source = plain_node(None);
    storage.insert_node(source.clone()).await;
    let search = NestedSearchProvider::search_id(source.id());
    let mut writer = layer.session();
    let mut reader = layer.session();

    writer.edit();
    let populated = NodeState::clone(&*writer.get_node(&search).await?);
    writer.destroy(populated.into())?;
    let summary = writer.update().await?;

    assert_eq!(summary.forwarded, 0);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.deleted_externals, 0);
    assert_eq!(storage.commit_count().await, 0);
    assert!(!layer.deleted_externals().contains(&search));

    let seen = reader.get_node(&search).await?;
    assert_eq!(seen.children().len(), 2);
    // The writer's own next cycle regenerates it as well
    assert!(writer.get_node(&search).await.is_ok());
    Ok(())
}

/// A node created with the id of a deleted external is readable again
#[tokio::test]
async fn test_recreated_external_readable() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut session = repo.layer.session();

    session.edit();
    let populated = NodeState::clone(&*session.get_node(search.id()).await?);
    session.destroy(populated.into())?;
    _ = session.update().await?;
    assert!(repo.layer.deleted_externals().contains(search.id()));
    assert!(!session.has_item(&ItemId::from(search.id())).await?);

    session.edit();
    let again = NodeState::new(search.id().clone(), None, FACET_SEARCH_TYPE);
    session.create(again.into()).await?;
    let summary = session.update().await?;

    assert_eq!(summary.forwarded, 1);
    assert!(!repo.layer.deleted_externals().contains(search.id()));
    let node = session.get_node(search.id()).await?;
    assert_eq!(node.children().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stale_write_is_retryable() -> Result<()> {
    let repo = repo()?;
    let node = plain_node(None);
    repo.storage.insert_node(node.clone()).await;
    let mut first = repo.layer.session();
    let mut second = repo.layer.session();

    let seen_by_first = (*first.get_node(node.id()).await?).clone();
    let seen_by_second = (*second.get_node(node.id()).await?).clone();

    first.edit();
    first.store(seen_by_first.with_mixin("mix:title").into())?;
    _ = first.update().await?;

    second.edit();
    second.store(seen_by_second.with_mixin("mix:versionable").into())?;
    let err = second
        .update()
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("stale write was accepted"))?;
    assert!(err.is_retryable());
    assert!(matches!(err, Error::Stale { .. }));

    // Refresh, read the current version, redo the change
    second.refresh();
    second.edit();
    let current = (*second.get_node(node.id()).await?).clone();
    second.store(current.with_mixin("mix:versionable").into())?;
    _ = second.update().await?;

    let stored = repo.storage.stored_node(node.id()).await;
    assert_eq!(stored.map(|n| n.mixins().len()), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_referential_integrity_propagated() -> Result<()> {
    let repo = repo()?;
    let target = plain_node(None);
    let owner = plain_node(None);
    let link = PropertyState::single(
        PropertyId::new(owner.id().clone(), "link"),
        Value::Reference(target.id().clone()),
    );
    repo.storage.insert_node(target.clone()).await;
    repo.storage.insert_node(owner.clone()).await;
    repo.storage.insert_property(link.clone()).await;
    let mut session = repo.layer.session();

    session.edit();
    let doomed = NodeState::clone(&*session.get_node(target.id()).await?);
    session.destroy(doomed.into())?;
    let err = session.update().await.err();

    assert_eq!(
        err,
        Some(Error::ReferentialIntegrity {
            target: target.id().clone(),
            referrer: link.id().clone(),
        })
    );
    assert!(!err.is_some_and(|e| e.is_retryable()));
    assert_eq!(repo.storage.node_count().await, 2);
    Ok(())
}

/// A rejected commit does not leave its external deletions recorded
#[tokio::test]
async fn test_rejected_commit_keeps_external_readable() -> Result<()> {
    let repo = repo()?;
    let search = facet_search_node(None);
    let owner = plain_node(None);
    let link = PropertyState::single(
        PropertyId::new(owner.id().clone(), "link"),
        Value::Reference(search.id().clone()),
    );
    repo.storage.insert_node(search.clone()).await;
    repo.storage.insert_node(owner.clone()).await;
    repo.storage.insert_property(link).await;
    let mut session = repo.layer.session();
    let mut other = repo.layer.session();

    session.edit();
    let doomed = NodeState::clone(&*session.get_node(search.id()).await?);
    session.destroy(doomed.into())?;
    let err = session.update().await.err();

    assert!(matches!(err, Some(Error::ReferentialIntegrity { .. })));
    assert!(!repo.layer.deleted_externals().contains(search.id()));

    session.refresh();
    let node = session.get_node(search.id()).await?;
    assert_eq!(node.children().len(), 2);
    assert!(other.get_node(search.id()).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_thresholds_from_config() -> Result<()> {
    let config = ManagerConfig::from_yaml(
        "virtual_state_threshold: 1\nparameterized_view_threshold: 1\n",
    )?;
    let repo = repo_with_config(config)?;
    let search = facet_search_node(None);
    repo.storage.insert_node(search.clone()).await;
    let mut session = repo.layer.session();

    _ = session.get_node(&FacetProvider::bucket_id(search.id(), "red")).await?;
    assert!(!session.exceeds_threshold());
    _ = session.get_node(&FacetProvider::bucket_id(search.id(), "blue")).await?;
    assert!(session.exceeds_threshold());

    // Crossing a ceiling never blocks reads
    assert_eq!(session.counters().virtual_states, 2);
    Ok(())
}
