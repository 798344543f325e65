use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, TransactionTrait};
use sea_orm_migration::MigratorTrait;

use crate::attached_function::AttachedFunctionStore;
use crate::collection::CollectionStore;
use crate::config::{GcConfig, SysdbConfig};
use crate::database::DatabaseStore;
use crate::function::FunctionStore;
use crate::migration::Migrator;
use crate::segment::SegmentStore;
use crate::tenant::TenantStore;
use sysdb_core::{
    AttachFunctionInput, AttachedFunction, AttachedFunctionApi, Collection, CollectionApi,
    CollectionId, CollectionWithMetadata, CreateAttachedFunctionInput, CreateCollectionInput,
    CreateCollectionResult, CreateSegmentInput, DatabaseApi, FlushCompactionInput,
    FlushCompactionResult, ForkCollectionInput, FunctionApi, GetSegmentsInput,
    PartialAttachedFunction, SysdbError, SysdbResult, Timestamp, UpdateCollectionInput,
};

/// Entry point over every store. Operations spanning more than one store run
/// in a single transaction here.
#[derive(Clone)]
pub struct MetaDomain {
    conn: DatabaseConnection,
    tenants: TenantStore,
    databases: DatabaseStore,
    segments: SegmentStore,
    collections: CollectionStore,
    functions: FunctionStore,
    attached_functions: AttachedFunctionStore,
}

impl MetaDomain {
    pub async fn connect(config: &SysdbConfig, base_dir: &Path) -> SysdbResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await?;
        Migrator::up(&conn, None).await?;
        log::info!("sysdb connected to {} backend", config.backend_name());
        let gc = config.gc.clone().unwrap_or_else(GcConfig::with_defaults);
        Ok(Self::from_connection(conn, &gc))
    }

    pub fn from_connection(conn: DatabaseConnection, gc: &GcConfig) -> Self {
        let defaults = GcConfig::with_defaults();
        let cleanup_batch_size = gc
            .cleanup_batch_size
            .or(defaults.cleanup_batch_size)
            .unwrap_or(1);
        let database_deletion_batch_size = gc
            .database_deletion_batch_size
            .or(defaults.database_deletion_batch_size)
            .unwrap_or(1);
        let segments = SegmentStore::new(conn.clone());
        Self {
            tenants: TenantStore::new(conn.clone()),
            databases: DatabaseStore::new(conn.clone(), database_deletion_batch_size),
            collections: CollectionStore::new(conn.clone(), segments.clone()),
            segments,
            functions: FunctionStore::new(conn.clone()),
            attached_functions: AttachedFunctionStore::new(conn.clone(), cleanup_batch_size),
            conn,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn tenants(&self) -> &TenantStore {
        &self.tenants
    }

    pub fn databases(&self) -> &DatabaseStore {
        &self.databases
    }

    pub fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    pub fn collections(&self) -> &CollectionStore {
        &self.collections
    }

    pub fn functions(&self) -> &FunctionStore {
        &self.functions
    }

    pub fn attached_functions(&self) -> &AttachedFunctionStore {
        &self.attached_functions
    }

    /// Creates a collection with its metadata and segments. With
    /// `get_or_create` an existing live collection of the same name is
    /// returned unchanged and `created` is false.
    pub async fn create_collection(
        &self,
        input: CreateCollectionInput,
    ) -> SysdbResult<CreateCollectionResult> {
        if input.name.is_empty() {
            return Err(SysdbError::invalid("collection name must not be empty"));
        }
        let tx = self.conn.begin().await?;
        let database = self
            .databases
            .fetch_by_name(&tx, &input.tenant, &input.database_name)
            .await?
            .ok_or_else(|| {
                SysdbError::not_found(format!(
                    "database {}/{}",
                    input.tenant, input.database_name
                ))
            })?;
        let now = Timestamp::now();
        let collection = Collection {
            id: input.id.unwrap_or_default(),
            name: input.name.clone(),
            tenant: input.tenant.clone(),
            database_id: database.id,
            configuration_json: input.configuration_json.clone(),
            schema_json: input.schema_json.clone(),
            dimension: input.dimension,
            log_position: 0,
            version: 0,
            version_file_name: None,
            root_collection_id: None,
            lineage_file_name: None,
            total_records_post_compaction: 0,
            size_bytes_post_compaction: 0,
            last_compaction_time_secs: 0,
            num_versions: 0,
            oldest_version_ts: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let created = self
            .collections
            .insert_in(&tx, &collection, input.get_or_create)
            .await?;
        if !created {
            let existing = self
                .collections
                .fetch_by_name_in(&tx, database.id, &input.name)
                .await?
                .ok_or_else(|| SysdbError::not_found(format!("collection {}", input.name)))?;
            let mut metadata = self
                .collections
                .fetch_metadata_in(&tx, &[existing.id.0])
                .await?;
            let segments = self
                .segments
                .fetch_segments_in(
                    &tx,
                    &GetSegmentsInput {
                        collection_id: Some(existing.id),
                        ..GetSegmentsInput::default()
                    },
                )
                .await?;
            tx.commit().await?;
            return Ok(CreateCollectionResult {
                collection: CollectionWithMetadata {
                    metadata: metadata.remove(&existing.id.0).unwrap_or_default(),
                    collection: existing,
                },
                segments,
                created: false,
            });
        }
        self.collections
            .insert_metadata_in(&tx, collection.id, &input.metadata)
            .await?;
        let segments = self
            .segments
            .insert_segments_in(&tx, collection.id, input.segments)
            .await?;
        tx.commit().await?;
        log::info!(
            "created collection {} ({}) in {}/{}",
            collection.name,
            collection.id,
            input.tenant,
            input.database_name
        );
        Ok(CreateCollectionResult {
            collection: CollectionWithMetadata {
                collection,
                metadata: input.metadata,
            },
            segments,
            created: true,
        })
    }

    /// Renames, reconfigures and replaces metadata under the collection lock.
    pub async fn update_collection(
        &self,
        input: UpdateCollectionInput,
    ) -> SysdbResult<CollectionWithMetadata> {
        let tx = self.conn.begin().await?;
        if self.collections.lock_collection(&tx, input.id).await? {
            return Err(SysdbError::not_found(format!("collection {}", input.id)));
        }
        self.collections.update_attributes_in(&tx, &input).await?;
        if input.reset_metadata || input.metadata.is_some() {
            self.collections.clear_metadata_in(&tx, input.id).await?;
        }
        if let Some(metadata) = &input.metadata {
            self.collections
                .insert_metadata_in(&tx, input.id, metadata)
                .await?;
        }
        let collection = self
            .collections
            .fetch_in(&tx, input.id, false)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("collection {}", input.id)))?;
        let mut metadata = self
            .collections
            .fetch_metadata_in(&tx, &[input.id.0])
            .await?;
        tx.commit().await?;
        Ok(CollectionWithMetadata {
            metadata: metadata.remove(&input.id.0).unwrap_or_default(),
            collection,
        })
    }

    /// Copies a live collection into a new member of the source's fork tree.
    pub async fn fork_collection(
        &self,
        input: ForkCollectionInput,
    ) -> SysdbResult<CreateCollectionResult> {
        if input.target_name.is_empty() {
            return Err(SysdbError::invalid("collection name must not be empty"));
        }
        let source_id = input.source_collection_id;
        let tx = self.conn.begin().await?;
        if self.collections.lock_collection(&tx, source_id).await? {
            return Err(SysdbError::not_found(format!("collection {source_id}")));
        }
        let source = self
            .collections
            .fetch_in(&tx, source_id, false)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("collection {source_id}")))?;
        let now = Timestamp::now();
        let fork = Collection {
            id: input.target_collection_id.unwrap_or_default(),
            name: input.target_name,
            tenant: source.tenant.clone(),
            database_id: source.database_id,
            configuration_json: source.configuration_json.clone(),
            schema_json: source.schema_json.clone(),
            dimension: source.dimension,
            log_position: source.log_position,
            version: 0,
            version_file_name: input.version_file_name,
            root_collection_id: Some(source.fork_tree_root()),
            lineage_file_name: None,
            total_records_post_compaction: source.total_records_post_compaction,
            size_bytes_post_compaction: source.size_bytes_post_compaction,
            last_compaction_time_secs: source.last_compaction_time_secs,
            num_versions: 0,
            oldest_version_ts: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.collections.insert_in(&tx, &fork, false).await?;

        let mut metadata = self
            .collections
            .fetch_metadata_in(&tx, &[source_id.0])
            .await?;
        let metadata = metadata.remove(&source_id.0).unwrap_or_default();
        self.collections
            .insert_metadata_in(&tx, fork.id, &metadata)
            .await?;

        let source_segments = self
            .segments
            .fetch_segments_in(
                &tx,
                &GetSegmentsInput {
                    collection_id: Some(source_id),
                    ..GetSegmentsInput::default()
                },
            )
            .await?;
        let copies = source_segments
            .into_iter()
            .map(|segment| CreateSegmentInput {
                id: None,
                segment_type: segment.segment_type,
                scope: segment.scope,
                file_paths: segment.file_paths,
                metadata: segment.metadata,
            })
            .collect();
        let segments = self
            .segments
            .insert_segments_in(&tx, fork.id, copies)
            .await?;
        tx.commit().await?;
        log::info!(
            "forked collection {source_id} into {} ({}) under root {}",
            fork.name,
            fork.id,
            source.fork_tree_root()
        );
        Ok(CreateCollectionResult {
            collection: CollectionWithMetadata {
                collection: fork,
                metadata,
            },
            segments,
            created: true,
        })
    }

    /// Records a finished compaction: bumps the version by one, swaps the
    /// segment file paths and stamps the collection and tenant.
    pub async fn flush_collection_compaction(
        &self,
        input: FlushCompactionInput,
    ) -> SysdbResult<FlushCompactionResult> {
        let id = input.collection_id;
        let tx = self.conn.begin().await?;
        if self.collections.lock_collection(&tx, id).await? {
            return Err(SysdbError::not_found(format!("collection {id}")));
        }
        let version = self
            .collections
            .update_log_position_and_version_in(
                &tx,
                id,
                input.log_position,
                input.current_version,
            )
            .await?;
        self.segments
            .update_file_paths_in(&tx, id, &input.segments)
            .await?;
        let last_compaction_time_secs = Timestamp::now().as_secs();
        self.collections
            .update_compaction_stats_in(
                &tx,
                id,
                input.total_records_post_compaction,
                input.size_bytes_post_compaction,
                last_compaction_time_secs,
                input.schema_json.as_deref(),
            )
            .await?;
        self.tenants
            .update_last_compaction_time_in(&tx, &input.tenant, last_compaction_time_secs)
            .await?;
        tx.commit().await?;
        log::info!(
            "flushed compaction of collection {id} at log position {} as version {version}",
            input.log_position
        );
        Ok(FlushCompactionResult {
            collection_id: id,
            version,
            last_compaction_time_secs,
        })
    }

    /// Soft-deletes the collection and every attached function reading from
    /// it. Deleting a missing or already deleted collection succeeds.
    pub async fn delete_collection(&self, id: CollectionId) -> SysdbResult<()> {
        let tx = self.conn.begin().await?;
        match self.collections.lock_collection(&tx, id).await {
            Ok(false) => {}
            Ok(true) => return Ok(()),
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        }
        let detached = self
            .attached_functions
            .soft_delete_for_collection_in(&tx, id)
            .await?;
        self.collections.soft_delete_in(&tx, id).await?;
        tx.commit().await?;
        log::info!(
            "soft deleted collection {id} and {} attached function(s)",
            detached.len()
        );
        Ok(())
    }

    /// Runs the three creation phases: insert the row, provision the output
    /// collection, then mark the row initialized. A failure between phases
    /// leaves a partial row for `cleanup_expired_partial_attached_functions`.
    pub async fn attach_function(&self, input: AttachFunctionInput) -> SysdbResult<AttachedFunction> {
        let function = self
            .functions
            .get_function_by_name(&input.function_name)
            .await?;
        let source = self
            .collections
            .get_collection(input.input_collection_id)
            .await?;
        let database = self.databases.get_database_by_id(source.database_id).await?;

        let attached = self
            .attached_functions
            .insert_attached_function(CreateAttachedFunctionInput {
                id: None,
                name: input.name,
                function_id: function.id,
                tenant: source.tenant.clone(),
                database_id: source.database_id,
                input_collection_id: source.id,
                output_collection_name: input.output_collection_name.clone(),
                params: input.params,
                min_records_for_invocation: input.min_records_for_invocation,
            })
            .await?;

        let output = self
            .create_collection(CreateCollectionInput {
                id: None,
                name: input.output_collection_name,
                tenant: source.tenant,
                database_name: database.name,
                configuration_json: None,
                schema_json: None,
                dimension: None,
                metadata: Default::default(),
                segments: Vec::new(),
                get_or_create: false,
            })
            .await
            .inspect_err(|err| {
                log::warn!(
                    "attached function {}: output collection not created: {err}",
                    attached.id
                );
            })?;
        let output_id = output.collection.collection.id;
        self.attached_functions
            .set_output_collection(attached.id, output_id)
            .await?;
        self.attached_functions
            .finish_attached_function_creation(attached.id)
            .await?;
        self.attached_functions
            .get_attached_function_by_id(attached.id)
            .await
    }

    /// Soft-deletes the attached function and, when asked, its output
    /// collection. A missing function is a no-op.
    pub async fn detach_function(
        &self,
        input_collection_id: CollectionId,
        name: &str,
        delete_output: bool,
    ) -> SysdbResult<()> {
        let tx = self.conn.begin().await?;
        let Some(attached) = self
            .attached_functions
            .fetch_by_name_in(&tx, input_collection_id, name)
            .await?
        else {
            return Ok(());
        };
        self.attached_functions
            .soft_delete_row_in(&tx, &attached)
            .await?;
        if delete_output && let Some(output_id) = attached.output_collection_id {
            self.collections.soft_delete_in(&tx, output_id).await?;
        }
        tx.commit().await?;
        log::info!(
            "detached function {name} ({}) from collection {input_collection_id}",
            attached.id
        );
        Ok(())
    }

    /// Soft-deletes abandoned partial creations together with any output
    /// collection they managed to provision. Each row and its output commit
    /// in the same batch transaction.
    pub async fn cleanup_expired_partial_attached_functions(
        &self,
        max_age: Duration,
    ) -> SysdbResult<Vec<PartialAttachedFunction>> {
        let (cutoff, expired) = self.attached_functions.expired_partials(max_age).await?;
        let mut cleaned = Vec::with_capacity(expired.len());
        for batch in expired.chunks(self.attached_functions.cleanup_batch_size()) {
            let tx = self.conn.begin().await?;
            let mut batch_cleaned = Vec::with_capacity(batch.len());
            for attached in batch {
                let Some(partial) = self
                    .attached_functions
                    .cleanup_partial_in(&tx, attached, cutoff)
                    .await?
                else {
                    continue;
                };
                if let Some(output_id) = partial.output_collection_id {
                    self.collections.soft_delete_in(&tx, output_id).await?;
                }
                batch_cleaned.push(partial);
            }
            tx.commit().await?;
            cleaned.extend(batch_cleaned);
        }
        if !cleaned.is_empty() {
            log::info!(
                "cleaned up {} partially created attached function(s) and their outputs",
                cleaned.len()
            );
        }
        Ok(cleaned)
    }
}
