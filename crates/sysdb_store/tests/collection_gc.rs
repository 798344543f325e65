use std::path::Path;
use std::time::Duration;

use sysdb_store::{
    Collection, CollectionApi, CollectionId, CreateCollectionInput, DEFAULT_DATABASE,
    DEFAULT_TENANT, ForkCollectionInput, ListCollectionsToGcInput, MetaDomain, Metadata,
    SysdbConfig, SysdbResult, Timestamp, UpdateVersionAndLogInput,
};
use tempfile::tempdir;

async fn open_domain(base: &Path) -> SysdbResult<MetaDomain> {
    let config = SysdbConfig::default_sqlite(base.join("sysdb.sqlite").to_string_lossy());
    MetaDomain::connect(&config, base).await
}

async fn create(domain: &MetaDomain, name: &str) -> SysdbResult<Collection> {
    let created = domain
        .create_collection(CreateCollectionInput {
            id: None,
            name: name.to_string(),
            tenant: DEFAULT_TENANT.to_string(),
            database_name: DEFAULT_DATABASE.to_string(),
            configuration_json: None,
            schema_json: None,
            dimension: None,
            metadata: Metadata::new(),
            segments: Vec::new(),
            get_or_create: false,
        })
        .await?;
    Ok(created.collection.collection)
}

async fn fork(domain: &MetaDomain, source: CollectionId, name: &str) -> SysdbResult<Collection> {
    let forked = domain
        .fork_collection(ForkCollectionInput {
            source_collection_id: source,
            target_collection_id: None,
            target_name: name.to_string(),
            version_file_name: None,
        })
        .await?;
    Ok(forked.collection.collection)
}

async fn record_versions(
    domain: &MetaDomain,
    id: CollectionId,
    num_versions: i64,
    oldest_version_ts: Timestamp,
) -> SysdbResult<()> {
    domain
        .collections()
        .update_version_and_log(UpdateVersionAndLogInput {
            collection_id: id,
            log_position: 0,
            current_version: 0,
            current_version_file_name: None,
            new_version: 1,
            new_version_file_name: format!("{id}/v1"),
            total_records_post_compaction: 0,
            size_bytes_post_compaction: 0,
            last_compaction_time_secs: 0,
            num_versions: Some(num_versions),
            oldest_version_ts: Some(oldest_version_ts),
            schema_json: None,
        })
        .await?;
    Ok(())
}

fn gc_input(cutoff: Timestamp, min_versions: i64, tenant: Option<&str>) -> ListCollectionsToGcInput {
    ListCollectionsToGcInput {
        cutoff,
        min_versions,
        limit: None,
        tenant: tenant.map(str::to_string),
    }
}

#[tokio::test]
async fn fork_tree_is_collected_through_its_root() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();

    let root = create(&domain, "root").await?;
    let first = fork(&domain, root.id, "fork-1").await?;
    let second = fork(&domain, first.id, "fork-2").await?;
    assert_eq!(first.root_collection_id, Some(root.id));
    assert_eq!(second.root_collection_id, Some(root.id));

    record_versions(&domain, root.id, 10, Timestamp::from_micros(1_000)).await?;
    record_versions(&domain, first.id, 3, Timestamp::from_micros(2_000)).await?;
    let standalone = create(&domain, "standalone").await?;
    record_versions(
        &domain,
        standalone.id,
        100,
        Timestamp::now().saturating_add(Duration::from_secs(60)),
    )
    .await?;
    let cutoff = Timestamp::now();

    let selected = collections
        .list_collections_to_gc(gc_input(cutoff, 5, None))
        .await?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, root.id);
    assert_eq!(selected[0].num_versions, 10);
    assert!(!selected[0].is_deleted);
    assert_eq!(
        selected[0].version_file_name,
        Some(format!("{}/v1", root.id))
    );

    assert!(
        collections
            .list_collections_to_gc(gc_input(cutoff, 50, None))
            .await?
            .is_empty()
    );
    collections.soft_delete_collection(second.id).await?;
    let selected = collections
        .list_collections_to_gc(gc_input(cutoff, 50, None))
        .await?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, root.id);
    assert!(!selected[0].is_deleted);

    assert!(
        collections
            .list_collections_to_gc(gc_input(cutoff, 5, Some("other")))
            .await?
            .is_empty()
    );
    assert_eq!(
        collections
            .list_collections_to_gc(gc_input(cutoff, 5, Some(DEFAULT_TENANT)))
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn limit_applies_after_grouping() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let small = create(&domain, "small").await?;
    let large = create(&domain, "large").await?;
    record_versions(&domain, small.id, 4, Timestamp::from_micros(10)).await?;
    record_versions(&domain, large.id, 9, Timestamp::from_micros(10)).await?;

    let mut input = gc_input(Timestamp::now(), 1, None);
    input.limit = Some(1);
    let selected = domain.collections().list_collections_to_gc(input).await?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, large.id);
    assert_eq!(selected[0].num_versions, 9);

    let mut none = gc_input(Timestamp::now(), 1, None);
    none.limit = Some(0);
    assert!(domain.collections().list_collections_to_gc(none).await?.is_empty());
    Ok(())
}
