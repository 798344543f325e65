use std::path::Path;

use sysdb_store::{
    Collection, CollectionApi, CreateCollectionInput, DEFAULT_DATABASE, DEFAULT_TENANT,
    MetaDomain, Metadata, SysdbConfig, SysdbError, SysdbResult, UpdateVersionAndLogInput,
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

fn advance(
    collection: &Collection,
    log_position: i64,
    current_version: i64,
    current_file: Option<&str>,
    new_file: &str,
) -> UpdateVersionAndLogInput {
    UpdateVersionAndLogInput {
        collection_id: collection.id,
        log_position,
        current_version,
        current_version_file_name: current_file.map(str::to_string),
        new_version: current_version + 1,
        new_version_file_name: new_file.to_string(),
        total_records_post_compaction: 10 * (current_version + 1),
        size_bytes_post_compaction: 1024,
        last_compaction_time_secs: 1_700_000_000,
        num_versions: None,
        oldest_version_ts: None,
        schema_json: None,
    }
}

#[tokio::test]
async fn version_advances_by_compare_and_swap() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;
    assert_eq!(collection.version, 0);
    assert!(collection.version_file_name.is_none());

    let version = collections
        .update_version_and_log(advance(&collection, 10, 0, None, "v1"))
        .await?;
    assert_eq!(version, 1);

    assert!(matches!(
        collections
            .update_version_and_log(advance(&collection, 10, 0, None, "v1-retry"))
            .await,
        Err(SysdbError::VersionStale { .. })
    ));

    let version = collections
        .update_version_and_log(advance(&collection, 20, 1, Some("v1"), "v2"))
        .await?;
    assert_eq!(version, 2);

    let stored = collections.get_collection(collection.id).await?;
    assert_eq!(stored.version, 2);
    assert_eq!(stored.log_position, 20);
    assert_eq!(stored.version_file_name.as_deref(), Some("v2"));
    assert_eq!(stored.total_records_post_compaction, 20);
    assert_eq!(collections.get_collection_size(collection.id).await?, 20);
    Ok(())
}

#[tokio::test]
async fn stale_log_position_leaves_row_untouched() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;
    collections
        .update_version_and_log(advance(&collection, 50, 0, None, "v1"))
        .await?;

    assert!(matches!(
        collections
            .update_version_and_log(advance(&collection, 40, 1, Some("v1"), "v2"))
            .await,
        Err(SysdbError::LogPositionStale { .. })
    ));
    let stored = collections.get_collection(collection.id).await?;
    assert_eq!(stored.version, 1);
    assert_eq!(stored.log_position, 50);
    assert_eq!(stored.version_file_name.as_deref(), Some("v1"));

    collections
        .update_version_and_log(advance(&collection, 50, 1, Some("v1"), "v2"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn version_jump_is_rejected() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collection = create(&domain, "docs").await?;
    let mut input = advance(&collection, 1, 0, None, "v2");
    input.new_version = 2;
    assert!(matches!(
        domain.collections().update_version_and_log(input).await,
        Err(SysdbError::VersionInvalid { .. })
    ));
    assert_eq!(domain.collections().get_collection(collection.id).await?.version, 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_advances_have_one_winner() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;

    let (left, right) = tokio::join!(
        collections.update_version_and_log(advance(&collection, 5, 0, None, "left")),
        collections.update_version_and_log(advance(&collection, 5, 0, None, "right")),
    );
    let results = [left, right];
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|result| matches!(result, Err(SysdbError::VersionStale { .. })))
    );
    assert_eq!(collections.get_collection(collection.id).await?.version, 1);
    Ok(())
}

#[tokio::test]
async fn locked_advance_classifies_stale_callers() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;

    assert_eq!(
        collections
            .update_log_position_and_version(collection.id, 30, 0)
            .await?,
        1
    );
    assert!(matches!(
        collections
            .update_log_position_and_version(collection.id, 20, 1)
            .await,
        Err(SysdbError::LogPositionStale { .. })
    ));
    assert!(matches!(
        collections
            .update_log_position_and_version(collection.id, 30, 0)
            .await,
        Err(SysdbError::VersionStale { .. })
    ));
    assert!(matches!(
        collections
            .update_log_position_and_version(collection.id, 30, 4)
            .await,
        Err(SysdbError::VersionInvalid { .. })
    ));
    assert_eq!(
        collections
            .update_log_position_and_version(collection.id, 30, 1)
            .await?,
        2
    );
    let stored = collections.get_collection(collection.id).await?;
    assert_eq!((stored.log_position, stored.version), (30, 2));
    Ok(())
}

#[tokio::test]
async fn lineage_file_name_swaps_on_match() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;

    collections
        .update_lineage_file_name(collection.id, None, "lineage-1")
        .await?;
    assert!(matches!(
        collections
            .update_lineage_file_name(collection.id, None, "lineage-x")
            .await,
        Err(SysdbError::VersionStale { .. })
    ));
    collections
        .update_lineage_file_name(collection.id, Some("lineage-1"), "lineage-2")
        .await?;
    assert_eq!(
        collections
            .get_collection(collection.id)
            .await?
            .lineage_file_name
            .as_deref(),
        Some("lineage-2")
    );
    Ok(())
}

#[tokio::test]
async fn deleted_collection_cannot_advance() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let collections = domain.collections();
    let collection = create(&domain, "docs").await?;
    collections.soft_delete_collection(collection.id).await?;

    assert!(
        collections
            .update_version_and_log(advance(&collection, 1, 0, None, "v1"))
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        collections
            .update_log_position_and_version(collection.id, 1, 0)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        collections
            .update_lineage_file_name(collection.id, None, "lineage")
            .await
            .is_err_and(|err| err.is_not_found())
    );
    Ok(())
}
