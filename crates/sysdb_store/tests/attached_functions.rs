use std::path::Path;
use std::time::Duration;

use sysdb_store::{
    AttachedFunction, AttachedFunctionApi, Collection, CreateAttachedFunctionInput,
    CreateCollectionInput, DEFAULT_DATABASE, DEFAULT_TENANT, FunctionApi, GcConfig, MetaDomain,
    Metadata, Nonce, SysdbConfig, SysdbError, SysdbResult, Timestamp,
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

/// Runs the first creation phase only.
async fn insert(
    domain: &MetaDomain,
    input: &Collection,
    name: &str,
) -> SysdbResult<AttachedFunction> {
    let function = domain.functions().get_function_by_name("record_counter").await?;
    domain
        .attached_functions()
        .insert_attached_function(CreateAttachedFunctionInput {
            id: None,
            name: name.to_string(),
            function_id: function.id,
            tenant: input.tenant.clone(),
            database_id: input.database_id,
            input_collection_id: input.id,
            output_collection_name: format!("{name}_out"),
            params: Some(r#"{"window":10}"#.to_string()),
            min_records_for_invocation: 100,
        })
        .await
}

async fn ready(
    domain: &MetaDomain,
    input: &Collection,
    name: &str,
) -> SysdbResult<AttachedFunction> {
    let attached = insert(domain, input, name).await?;
    let output = create(domain, &format!("{name}_out")).await?;
    let store = domain.attached_functions();
    store.set_output_collection(attached.id, output.id).await?;
    store.finish_attached_function_creation(attached.id).await?;
    store.get_attached_function_by_id(attached.id).await
}

#[tokio::test]
async fn creation_is_invisible_until_finished() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;

    let attached = insert(&domain, &input, "counter").await?;
    assert!(attached.lowest_live_nonce.is_none());
    assert!(matches!(
        store.get_attached_function_by_id(attached.id).await,
        Err(SysdbError::NotReady { .. })
    ));
    assert!(matches!(
        store.get_attached_function_by_name(input.id, "counter").await,
        Err(SysdbError::NotReady { .. })
    ));
    assert!(store.list_attached_functions(input.id).await?.is_empty());
    assert!(matches!(
        insert(&domain, &input, "counter").await,
        Err(SysdbError::AlreadyExists { .. })
    ));

    let output = create(&domain, "counter_out").await?;
    store.set_output_collection(attached.id, output.id).await?;
    store.set_output_collection(attached.id, output.id).await?;
    store.finish_attached_function_creation(attached.id).await?;
    store.finish_attached_function_creation(attached.id).await?;
    assert!(matches!(
        store.set_output_collection(attached.id, input.id).await,
        Err(SysdbError::Validation { .. })
    ));

    let stored = store.get_attached_function_by_name(input.id, "counter").await?;
    assert_eq!(stored.lowest_live_nonce, Some(attached.next_nonce));
    assert_eq!(stored.output_collection_id, Some(output.id));
    assert!(!stored.needs_verification());
    assert_eq!(store.list_attached_functions(input.id).await?, vec![stored]);
    Ok(())
}

#[tokio::test]
async fn run_lifecycle_fences_stale_nonces() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let attached = ready(&domain, &input, "counter").await?;
    let first_nonce = attached.next_nonce;

    let advanced = store
        .advance_attached_function(attached.id, first_nonce, 25, Duration::from_secs(60))
        .await?;
    assert_ne!(advanced.next_nonce, first_nonce);
    assert_eq!(advanced.completion_offset, 25);
    let mid_run = store.get_attached_function_by_id(attached.id).await?;
    assert!(mid_run.needs_verification());
    assert_eq!(mid_run.lowest_live_nonce, Some(first_nonce));
    assert!(mid_run.last_run.is_some());
    assert_eq!(mid_run.next_run, advanced.next_run);

    store
        .update_completion_offset(attached.id, first_nonce, 30)
        .await?;
    store
        .finish_attached_function(attached.id, advanced.next_nonce)
        .await?;
    let settled = store.get_attached_function_by_id(attached.id).await?;
    assert_eq!(settled.lowest_live_nonce, Some(advanced.next_nonce));
    assert_eq!(settled.completion_offset, 30);
    assert!(!settled.needs_verification());

    assert!(
        store
            .update_completion_offset(attached.id, first_nonce, 40)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        store
            .advance_attached_function(attached.id, first_nonce, 50, Duration::ZERO)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        store
            .advance_attached_function(attached.id, advanced.next_nonce, 10, Duration::ZERO)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        store
            .finish_attached_function(attached.id, Nonce::generate())
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert_eq!(
        store.get_attached_function_by_id(attached.id).await?.completion_offset,
        30
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_advances_have_one_winner() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let attached = ready(&domain, &input, "counter").await?;

    let (left, right) = tokio::join!(
        store.advance_attached_function(attached.id, attached.next_nonce, 5, Duration::ZERO),
        store.advance_attached_function(attached.id, attached.next_nonce, 5, Duration::ZERO),
    );
    let results = [left, right];
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|result| result.as_ref().is_err_and(|err| err.is_not_found()))
    );
    Ok(())
}

#[tokio::test]
async fn failed_attempts_accumulate_until_advance() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let attached = ready(&domain, &input, "counter").await?;
    let delay = Duration::from_secs(30);

    assert_eq!(
        store
            .record_failed_attempt(attached.id, attached.next_nonce, delay)
            .await?,
        1
    );
    assert_eq!(
        store
            .record_failed_attempt(attached.id, attached.next_nonce, delay)
            .await?,
        2
    );
    assert!(
        store
            .record_failed_attempt(attached.id, Nonce::generate(), delay)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    let retried = store.get_attached_function_by_id(attached.id).await?;
    assert!(retried.next_run > attached.next_run);

    store
        .advance_attached_function(attached.id, attached.next_nonce, 1, Duration::ZERO)
        .await?;
    assert_eq!(
        store
            .get_attached_function_by_id(attached.id)
            .await?
            .current_attempts,
        0
    );
    Ok(())
}

#[tokio::test]
async fn soft_delete_frees_the_name() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let attached = ready(&domain, &input, "counter").await?;

    store.soft_delete_attached_function(input.id, "counter").await?;
    store.soft_delete_attached_function(input.id, "counter").await?;
    store.soft_delete_attached_function_by_id(attached.id).await?;
    assert!(
        store
            .get_attached_function_by_id(attached.id)
            .await
            .is_err_and(|err| err.is_not_found())
    );
    assert!(
        store
            .advance_attached_function(attached.id, attached.next_nonce, 1, Duration::ZERO)
            .await
            .is_err_and(|err| err.is_not_found())
    );

    let reused = insert(&domain, &input, "counter").await?;
    assert_ne!(reused.id, attached.id);
    Ok(())
}

#[tokio::test]
async fn cleanup_targets_only_partial_rows() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let settled = ready(&domain, &input, "settled").await?;
    let partial = insert(&domain, &input, "partial").await?;

    assert!(
        store
            .cleanup_expired_partial_attached_functions(Duration::from_secs(3_600))
            .await?
            .is_empty()
    );
    let cleaned = store
        .cleanup_expired_partial_attached_functions(Duration::ZERO)
        .await?;
    assert_eq!(cleaned.len(), 1);
    assert_eq!(cleaned[0].id, partial.id);
    assert!(cleaned[0].output_collection_id.is_none());
    assert!(
        store
            .cleanup_expired_partial_attached_functions(Duration::ZERO)
            .await?
            .is_empty()
    );
    assert_eq!(store.get_attached_function_by_id(settled.id).await?, settled);
    Ok(())
}

#[tokio::test]
async fn cleanup_walks_every_batch() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let mut config = SysdbConfig::default_sqlite(base.join("sysdb.sqlite").to_string_lossy());
    config.gc = Some(GcConfig {
        cleanup_batch_size: Some(1),
        database_deletion_batch_size: None,
    });
    let domain = MetaDomain::connect(&config, base).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let mut partial_ids = Vec::new();
    for name in ["first", "second", "third"] {
        partial_ids.push(insert(&domain, &input, name).await?.id);
    }

    let cleaned = store
        .cleanup_expired_partial_attached_functions(Duration::ZERO)
        .await?;
    let mut cleaned_ids = cleaned.iter().map(|partial| partial.id).collect::<Vec<_>>();
    cleaned_ids.sort_by_key(|id| id.0);
    partial_ids.sort_by_key(|id| id.0);
    assert_eq!(cleaned_ids, partial_ids);
    for id in partial_ids {
        assert!(
            store
                .get_attached_function_by_id(id)
                .await
                .is_err_and(|err| err.is_not_found())
        );
    }
    Ok(())
}

#[tokio::test]
async fn gc_removes_only_deleted_or_abandoned_rows() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let input = create(&domain, "docs").await?;
    let live = ready(&domain, &input, "live").await?;
    let deleted = ready(&domain, &input, "deleted").await?;
    store.soft_delete_attached_function_by_id(deleted.id).await?;

    let cutoff = Timestamp::now().saturating_add(Duration::from_secs(1));
    let candidates = store.get_attached_functions_to_gc(cutoff, None).await?;
    assert_eq!(
        candidates.iter().map(|row| row.id).collect::<Vec<_>>(),
        vec![deleted.id]
    );
    assert!(
        store
            .get_attached_functions_to_gc(Timestamp::from_secs(1), None)
            .await?
            .is_empty()
    );

    assert!(!store.hard_delete_attached_function(live.id, cutoff).await?);
    assert!(store.hard_delete_attached_function(deleted.id, cutoff).await?);
    assert!(!store.hard_delete_attached_function(deleted.id, cutoff).await?);
    assert!(store.get_attached_functions_to_gc(cutoff, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn schedule_peek_and_min_offset() -> SysdbResult<()> {
    let dir = tempdir().expect("tempdir");
    let domain = open_domain(dir.path()).await?;
    let store = domain.attached_functions();
    let docs = create(&domain, "docs").await?;
    let logs = create(&domain, "logs").await?;
    assert_eq!(store.get_min_completion_offset_for_collection(docs.id).await?, None);

    let fast = ready(&domain, &docs, "fast").await?;
    let slow = ready(&domain, &docs, "slow").await?;
    let other = ready(&domain, &logs, "other").await?;
    insert(&domain, &docs, "pending").await?;

    store
        .advance_attached_function(fast.id, fast.next_nonce, 40, Duration::from_secs(10))
        .await?;
    store
        .advance_attached_function(slow.id, slow.next_nonce, 15, Duration::from_secs(600))
        .await?;

    let entries = store.peek_schedule_by_collection_id(&[docs.id]).await?;
    assert_eq!(
        entries
            .iter()
            .map(|entry| entry.attached_function_id)
            .collect::<Vec<_>>(),
        vec![fast.id, slow.id]
    );
    assert_eq!(entries[0].completion_offset, 40);
    assert_eq!(entries[0].lowest_live_nonce, fast.next_nonce);
    assert_eq!(entries[0].min_records_for_invocation, 100);

    let both = store
        .peek_schedule_by_collection_id(&[docs.id, logs.id])
        .await?;
    assert_eq!(both.len(), 3);
    assert_eq!(both[0].attached_function_id, other.id);
    assert!(store.peek_schedule_by_collection_id(&[]).await?.is_empty());

    assert_eq!(
        store.get_min_completion_offset_for_collection(docs.id).await?,
        Some(0)
    );
    store.soft_delete_attached_function(docs.id, "pending").await?;
    assert_eq!(
        store.get_min_completion_offset_for_collection(docs.id).await?,
        Some(15)
    );
    Ok(())
}
