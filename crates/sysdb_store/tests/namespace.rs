use std::path::Path;
use std::time::Duration;

use sysdb_store::{
    CollectionApi, CreateCollectionInput, CreateDatabaseInput, CreateTenantInput, DEFAULT_TENANT,
    DatabaseApi, MetaDomain, Metadata, SysdbConfig, SysdbError, SysdbResult, TenantApi,
    Timestamp,
};
use tempfile::tempdir;

async fn open_domain(base: &Path) -> SysdbResult<MetaDomain> {
    let config = SysdbConfig::default_sqlite(base.join("sysdb.sqlite").to_string_lossy());
    MetaDomain::connect(&config, base).await
}

fn tenant(id: &str) -> CreateTenantInput {
    CreateTenantInput {
        id: id.to_string(),
        resource_name: None,
    }
}

fn database(tenant: &str, name: &str) -> CreateDatabaseInput {
    CreateDatabaseInput {
        id: None,
        name: name.to_string(),
        tenant: tenant.to_string(),
    }
}

#[tokio::test]
async fn tenant_crud_and_resource_name() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let tenants = domain.tenants();

    let created = tenants.create_tenant(tenant("acme")).await?;
    assert_eq!(created.id, "acme");
    assert!(matches!(
        tenants.create_tenant(tenant("acme")).await,
        Err(SysdbError::AlreadyExists { .. })
    ));
    assert!(matches!(
        tenants.create_tenant(tenant("")).await,
        Err(SysdbError::Validation { .. })
    ));

    tenants.set_tenant_resource_name("acme", "crn:acme").await?;
    tenants.set_tenant_resource_name("acme", "crn:acme").await?;
    assert!(matches!(
        tenants.set_tenant_resource_name("acme", "crn:other").await,
        Err(SysdbError::AlreadyExists { .. })
    ));
    assert_eq!(
        tenants.get_tenant("acme").await?.resource_name.as_deref(),
        Some("crn:acme")
    );

    tenants.update_tenant_last_compaction_time("acme", 1_700).await?;
    let times = tenants
        .get_tenants_last_compaction_time(&["acme".to_string(), "missing".to_string()])
        .await?;
    assert_eq!(times, vec![("acme".to_string(), 1_700)]);
    assert!(
        tenants
            .update_tenant_last_compaction_time("missing", 1)
            .await
            .is_err_and(|err| err.is_not_found())
    );

    let listed = tenants.list_tenants(None, 0).await?;
    assert_eq!(listed.len(), 2);
    let page = tenants.list_tenants(Some(1), 1).await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, listed[1].id);

    tenants.soft_delete_tenant("acme").await?;
    tenants.soft_delete_tenant("acme").await?;
    tenants.soft_delete_tenant("never-existed").await?;
    assert!(
        tenants
            .get_tenant("acme")
            .await
            .is_err_and(|err| err.is_not_found())
    );
    Ok(())
}

#[tokio::test]
async fn database_crud_and_name_reuse() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let databases = domain.databases();
    domain.tenants().create_tenant(tenant("acme")).await?;

    let first = databases.create_database(database("acme", "prod")).await?;
    let second = databases.create_database(database("acme", "staging")).await?;
    assert!(matches!(
        databases.create_database(database("acme", "prod")).await,
        Err(SysdbError::AlreadyExists { .. })
    ));
    assert!(
        databases
            .create_database(database("ghost", "prod"))
            .await
            .is_err_and(|err| err.is_not_found())
    );
    databases
        .create_database(database(DEFAULT_TENANT, "prod"))
        .await?;

    assert_eq!(databases.get_database("acme", "prod").await?, first);
    assert_eq!(databases.get_database_by_id(second.id).await?, second);
    let listed = databases.list_databases("acme", None, 0).await?;
    assert_eq!(listed, vec![first.clone(), second.clone()]);
    assert_eq!(
        databases.list_databases("acme", Some(1), 1).await?,
        vec![second.clone()]
    );

    databases.soft_delete_database("acme", "prod").await?;
    databases.soft_delete_database("acme", "prod").await?;
    databases.soft_delete_database("acme", "unknown").await?;
    assert!(
        databases
            .get_database("acme", "prod")
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        databases
            .get_database_by_id(first.id)
            .await
            .is_err_and(|err| err.is_not_found())
    );

    let reused = databases.create_database(database("acme", "prod")).await?;
    assert_ne!(reused.id, first.id);
    Ok(())
}

#[tokio::test]
async fn reaper_waits_for_collections_to_go() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let databases = domain.databases();
    databases
        .create_database(database(DEFAULT_TENANT, "scratch"))
        .await?;
    databases
        .create_database(database(DEFAULT_TENANT, "empty"))
        .await?;
    let created = domain
        .create_collection(CreateCollectionInput {
            id: None,
            name: "docs".to_string(),
            tenant: DEFAULT_TENANT.to_string(),
            database_name: "scratch".to_string(),
            configuration_json: None,
            schema_json: None,
            dimension: None,
            metadata: Metadata::new(),
            segments: Vec::new(),
            get_or_create: false,
        })
        .await?;
    let collection_id = created.collection.collection.id;

    databases.soft_delete_database(DEFAULT_TENANT, "scratch").await?;
    databases.soft_delete_database(DEFAULT_TENANT, "empty").await?;

    let past = Timestamp::from_secs(1);
    assert_eq!(databases.finish_database_deletion(past).await?, 0);

    let cutoff = Timestamp::now().saturating_add(Duration::from_secs(1));
    assert_eq!(databases.finish_database_deletion(cutoff).await?, 1);

    domain.collections().soft_delete_collection(collection_id).await?;
    assert_eq!(databases.finish_database_deletion(cutoff).await?, 0);
    domain.collections().hard_delete_collection(collection_id).await?;
    assert_eq!(databases.finish_database_deletion(cutoff).await?, 1);
    assert_eq!(databases.finish_database_deletion(cutoff).await?, 0);
    Ok(())
}
