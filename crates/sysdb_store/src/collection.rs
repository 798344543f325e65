use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Expr, ExprTrait, Func, OnConflict, Order, Query, SelectStatement, Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, TransactionTrait};

use crate::db::{CollectionMetadata, Collections, Databases, SegmentMetadata, Segments};
use crate::segment::SegmentStore;
use crate::sql::{
    col_name, deleted_marker_name, exec, exec_rows, id_value, metadata_columns, opt_id_value,
    paginate, query_all, query_one, read_id, read_metadata_value, read_opt_id,
    read_opt_timestamp, read_timestamp,
};
use sysdb_core::{
    Collection, CollectionApi, CollectionId, CollectionToGc, CollectionWithMetadata, DatabaseId,
    Id, ListCollectionsInput, ListCollectionsToGcInput, Metadata, SysdbError, SysdbResult,
    Timestamp, UpdateCollectionInput, UpdateVersionAndLogInput,
};

const COLLECTION_COLUMNS: [Collections; 20] = [
    Collections::Id,
    Collections::Name,
    Collections::Tenant,
    Collections::DatabaseId,
    Collections::ConfigurationJson,
    Collections::SchemaJson,
    Collections::Dimension,
    Collections::LogPosition,
    Collections::Version,
    Collections::VersionFileName,
    Collections::RootCollectionId,
    Collections::LineageFileName,
    Collections::TotalRecordsPostCompaction,
    Collections::SizeBytesPostCompaction,
    Collections::LastCompactionTimeSecs,
    Collections::NumVersions,
    Collections::OldestVersionTs,
    Collections::IsDeleted,
    Collections::CreatedAt,
    Collections::UpdatedAt,
];

#[derive(Clone)]
pub struct CollectionStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    segments: SegmentStore,
}

impl CollectionStore {
    pub(crate) fn new(conn: DatabaseConnection, segments: SegmentStore) -> Self {
        let backend = conn.get_database_backend();
        Self {
            conn,
            backend,
            segments,
        }
    }

    pub(crate) async fn fetch_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
        include_deleted: bool,
    ) -> SysdbResult<Option<Collection>> {
        let mut select = collection_select();
        select.and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0))).limit(1);
        if !include_deleted {
            select.and_where(Expr::col(Collections::IsDeleted).eq(false));
        }
        query_one(conn, &select)
            .await?
            .map(|row| collection_from_row(&row))
            .transpose()
    }

    pub(crate) async fn fetch_by_name_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        database_id: DatabaseId,
        name: &str,
    ) -> SysdbResult<Option<Collection>> {
        let select = collection_select()
            .and_where(Expr::col(Collections::DatabaseId).eq(id_value(self.backend, database_id.0)))
            .and_where(Expr::col(Collections::Name).eq(name))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| collection_from_row(&row))
            .transpose()
    }

    async fn require_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
    ) -> SysdbResult<Collection> {
        self.fetch_in(conn, id, false)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("collection {id}")))
    }

    /// Inserts a fully formed row. With `get_or_create` a name collision is
    /// ignored and reported as `false`.
    pub(crate) async fn insert_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        collection: &Collection,
        get_or_create: bool,
    ) -> SysdbResult<bool> {
        let mut insert = Query::insert()
            .into_table(Collections::Table)
            .columns(COLLECTION_COLUMNS)
            .values_panic(collection_values(self.backend, collection).into_iter().map(Into::into))
            .to_owned();
        if get_or_create {
            insert.on_conflict(
                OnConflict::columns([Collections::Name, Collections::DatabaseId])
                    .do_nothing()
                    .to_owned(),
            );
        }
        let affected = exec_rows(conn, &insert).await.map_err(|err| {
            err.or_already_exists(format!(
                "collection {} in database {}",
                collection.name, collection.database_id
            ))
        })?;
        Ok(affected > 0)
    }

    pub(crate) async fn insert_metadata_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
        metadata: &Metadata,
    ) -> SysdbResult<()> {
        if metadata.is_empty() {
            return Ok(());
        }
        let now = Timestamp::now().as_micros();
        let mut insert = Query::insert()
            .into_table(CollectionMetadata::Table)
            .columns([
                CollectionMetadata::CollectionId,
                CollectionMetadata::Key,
                CollectionMetadata::StrValue,
                CollectionMetadata::IntValue,
                CollectionMetadata::FloatValue,
                CollectionMetadata::BoolValue,
                CollectionMetadata::CreatedAt,
                CollectionMetadata::UpdatedAt,
            ])
            .to_owned();
        for (key, value) in metadata {
            let [str_value, int_value, float_value, bool_value] = metadata_columns(value);
            insert.values_panic([
                id_value(self.backend, id.0).into(),
                key.clone().into(),
                str_value.into(),
                int_value.into(),
                float_value.into(),
                bool_value.into(),
                now.into(),
                now.into(),
            ]);
        }
        exec(conn, &insert).await
    }

    pub(crate) async fn clear_metadata_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
    ) -> SysdbResult<()> {
        let delete = Query::delete()
            .from_table(CollectionMetadata::Table)
            .and_where(Expr::col(CollectionMetadata::CollectionId).eq(id_value(self.backend, id.0)))
            .to_owned();
        exec(conn, &delete).await
    }

    pub(crate) async fn fetch_metadata_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[Id],
    ) -> SysdbResult<HashMap<Id, Metadata>> {
        let mut grouped: HashMap<Id, Metadata> = HashMap::new();
        if ids.is_empty() {
            return Ok(grouped);
        }
        let select = Query::select()
            .from(CollectionMetadata::Table)
            .columns([
                CollectionMetadata::CollectionId,
                CollectionMetadata::Key,
                CollectionMetadata::StrValue,
                CollectionMetadata::IntValue,
                CollectionMetadata::FloatValue,
                CollectionMetadata::BoolValue,
            ])
            .and_where(
                Expr::col(CollectionMetadata::CollectionId)
                    .is_in(ids.iter().map(|id| id_value(self.backend, *id))),
            )
            .to_owned();
        for row in query_all(conn, &select).await? {
            let collection_id = read_id(&row, CollectionMetadata::CollectionId)?;
            let key: String = row.try_get("", &col_name(CollectionMetadata::Key))?;
            let value = read_metadata_value(
                &row,
                CollectionMetadata::StrValue,
                CollectionMetadata::IntValue,
                CollectionMetadata::FloatValue,
                CollectionMetadata::BoolValue,
            )?;
            grouped.entry(collection_id).or_default().insert(key, value);
        }
        Ok(grouped)
    }

    /// Applies the set fields of `input` other than metadata. Returns
    /// `NotFound` when the row is missing or soft deleted.
    pub(crate) async fn update_attributes_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: &UpdateCollectionInput,
    ) -> SysdbResult<()> {
        let mut update = Query::update()
            .table(Collections::Table)
            .value(Collections::UpdatedAt, Timestamp::now().as_micros())
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, input.id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .to_owned();
        if let Some(name) = &input.name {
            if name.is_empty() {
                return Err(SysdbError::invalid("collection name must not be empty"));
            }
            update.value(Collections::Name, name.as_str());
        }
        if let Some(configuration_json) = &input.configuration_json {
            update.value(Collections::ConfigurationJson, configuration_json.as_str());
        }
        if let Some(dimension) = input.dimension {
            update.value(Collections::Dimension, dimension);
        }
        let affected = exec_rows(conn, &update).await.map_err(|err| {
            err.or_already_exists(format!(
                "collection name {}",
                input.name.as_deref().unwrap_or_default()
            ))
        })?;
        if affected == 0 {
            return Err(SysdbError::not_found(format!("collection {}", input.id)));
        }
        Ok(())
    }

    pub(crate) async fn update_compaction_stats_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
        total_records_post_compaction: i64,
        size_bytes_post_compaction: i64,
        last_compaction_time_secs: i64,
        schema_json: Option<&str>,
    ) -> SysdbResult<()> {
        let mut update = Query::update()
            .table(Collections::Table)
            .values([
                (
                    Collections::TotalRecordsPostCompaction,
                    total_records_post_compaction.into(),
                ),
                (
                    Collections::SizeBytesPostCompaction,
                    size_bytes_post_compaction.into(),
                ),
                (
                    Collections::LastCompactionTimeSecs,
                    last_compaction_time_secs.into(),
                ),
                (Collections::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .to_owned();
        if let Some(schema_json) = schema_json {
            update.value(Collections::SchemaJson, schema_json);
        }
        if exec_rows(conn, &update).await? == 0 {
            return Err(SysdbError::not_found(format!("collection {id}")));
        }
        Ok(())
    }

    pub(crate) async fn update_log_position_and_version_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
        log_position: i64,
        current_version: i64,
    ) -> SysdbResult<i64> {
        let select = Query::select()
            .from(Collections::Table)
            .columns([Collections::LogPosition, Collections::Version])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .lock_exclusive()
            .to_owned();
        let row = query_one(conn, &select)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("collection {id}")))?;
        let stored_log_position: i64 = row.try_get("", &col_name(Collections::LogPosition))?;
        let stored_version: i64 = row.try_get("", &col_name(Collections::Version))?;
        if stored_log_position > log_position {
            log::debug!(
                "collection {id}: log position {log_position} behind stored {stored_log_position}"
            );
            return Err(SysdbError::log_position_stale(format!(
                "collection {id}: log position {log_position} < {stored_log_position}"
            )));
        }
        if stored_version > current_version {
            log::debug!("collection {id}: version {current_version} behind stored {stored_version}");
            return Err(SysdbError::version_stale(format!(
                "collection {id}: version {current_version} < {stored_version}"
            )));
        }
        if stored_version < current_version {
            log::warn!(
                "collection {id}: caller version {current_version} ahead of stored {stored_version}"
            );
            return Err(SysdbError::version_invalid(format!(
                "collection {id}: version {current_version} > {stored_version}"
            )));
        }
        let new_version = current_version + 1;
        let update = Query::update()
            .table(Collections::Table)
            .values([
                (Collections::LogPosition, log_position.into()),
                (Collections::Version, new_version.into()),
                (Collections::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::Version).eq(current_version))
            .to_owned();
        if exec_rows(conn, &update).await? == 0 {
            return Err(SysdbError::version_stale(format!(
                "collection {id}: version {current_version} was advanced concurrently"
            )));
        }
        Ok(new_version)
    }

    /// Renames the row to its deleted marker. Returns whether a live row was
    /// found.
    pub(crate) async fn soft_delete_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
    ) -> SysdbResult<bool> {
        let Some(collection) = self.fetch_in(conn, id, false).await? else {
            return Ok(false);
        };
        let update = Query::update()
            .table(Collections::Table)
            .values([
                (
                    Collections::Name,
                    deleted_marker_name(&collection.name, id.0).into(),
                ),
                (Collections::IsDeleted, true.into()),
                (Collections::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .to_owned();
        Ok(exec_rows(conn, &update).await? > 0)
    }

    /// Takes exclusive row locks over the collection, its metadata, its
    /// segments and their metadata, in that order. Returns `is_deleted`.
    pub async fn lock_collection<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: CollectionId,
    ) -> SysdbResult<bool> {
        let collection = Query::select()
            .from(Collections::Table)
            .columns([Collections::Id, Collections::IsDeleted])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .lock_exclusive()
            .to_owned();
        let row = query_one(conn, &collection)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("collection {id}")))?;
        let is_deleted: bool = row.try_get("", &col_name(Collections::IsDeleted))?;

        let metadata = Query::select()
            .from(CollectionMetadata::Table)
            .columns([CollectionMetadata::CollectionId, CollectionMetadata::Key])
            .and_where(Expr::col(CollectionMetadata::CollectionId).eq(id_value(self.backend, id.0)))
            .order_by(CollectionMetadata::Key, Order::Asc)
            .lock_exclusive()
            .to_owned();
        query_all(conn, &metadata).await?;

        let segments = Query::select()
            .from(Segments::Table)
            .column(Segments::Id)
            .and_where(Expr::col(Segments::CollectionId).eq(id_value(self.backend, id.0)))
            .order_by(Segments::Id, Order::Asc)
            .lock_exclusive()
            .to_owned();
        let segment_ids = query_all(conn, &segments)
            .await?
            .iter()
            .map(|row| read_id(row, Segments::Id))
            .collect::<SysdbResult<Vec<_>>>()?;

        if !segment_ids.is_empty() {
            let segment_metadata = Query::select()
                .from(SegmentMetadata::Table)
                .columns([SegmentMetadata::SegmentId, SegmentMetadata::Key])
                .and_where(
                    Expr::col(SegmentMetadata::SegmentId)
                        .is_in(segment_ids.iter().map(|id| id_value(self.backend, *id))),
                )
                .order_by(SegmentMetadata::SegmentId, Order::Asc)
                .order_by(SegmentMetadata::Key, Order::Asc)
                .lock_exclusive()
                .to_owned();
            query_all(conn, &segment_metadata).await?;
        }
        Ok(is_deleted)
    }

    fn scoped_select(&self, tenant: &str, database_name: Option<&str>) -> SelectStatement {
        let mut select = collection_select();
        select
            .and_where(Expr::col(Collections::Tenant).eq(tenant))
            .and_where(Expr::col(Collections::IsDeleted).eq(false));
        if let Some(database_name) = database_name {
            select.and_where(Expr::col(Collections::DatabaseId).in_subquery(database_ids(
                tenant,
                database_name,
            )));
        }
        select
    }

    /// Classifies a CAS write that matched no row.
    async fn classify_conflict(
        &self,
        id: CollectionId,
        log_position: i64,
        current_version: i64,
    ) -> SysdbError {
        let stored = match self.fetch_in(&self.conn, id, true).await {
            Ok(stored) => stored,
            Err(err) => return err,
        };
        match stored {
            None => SysdbError::not_found(format!("collection {id}")),
            Some(stored) if stored.is_deleted => SysdbError::not_found(format!("collection {id}")),
            Some(stored) if stored.log_position > log_position => {
                log::debug!(
                    "collection {id}: log position {log_position} behind stored {}",
                    stored.log_position
                );
                SysdbError::log_position_stale(format!(
                    "collection {id}: log position {log_position} < {}",
                    stored.log_position
                ))
            }
            Some(stored) => {
                log::debug!(
                    "collection {id}: version {current_version} conflicts with stored {}",
                    stored.version
                );
                SysdbError::version_stale(format!(
                    "collection {id}: expected version {current_version}, stored {}",
                    stored.version
                ))
            }
        }
    }
}

fn database_ids(tenant: &str, database_name: &str) -> SelectStatement {
    Query::select()
        .column(Databases::Id)
        .from(Databases::Table)
        .and_where(Expr::col(Databases::TenantId).eq(tenant))
        .and_where(Expr::col(Databases::Name).eq(database_name))
        .and_where(Expr::col(Databases::IsDeleted).eq(false))
        .to_owned()
}

fn collection_select() -> SelectStatement {
    Query::select()
        .from(Collections::Table)
        .columns(COLLECTION_COLUMNS)
        .to_owned()
}

fn collection_values(backend: DatabaseBackend, collection: &Collection) -> Vec<SeaValue> {
    vec![
        id_value(backend, collection.id.0),
        collection.name.clone().into(),
        collection.tenant.clone().into(),
        id_value(backend, collection.database_id.0),
        collection.configuration_json.clone().into(),
        collection.schema_json.clone().into(),
        collection.dimension.into(),
        collection.log_position.into(),
        collection.version.into(),
        collection.version_file_name.clone().into(),
        opt_id_value(backend, collection.root_collection_id.map(|root| root.0)),
        collection.lineage_file_name.clone().into(),
        collection.total_records_post_compaction.into(),
        collection.size_bytes_post_compaction.into(),
        collection.last_compaction_time_secs.into(),
        collection.num_versions.into(),
        collection.oldest_version_ts.map(Timestamp::as_micros).into(),
        collection.is_deleted.into(),
        collection.created_at.as_micros().into(),
        collection.updated_at.as_micros().into(),
    ]
}

fn collection_from_row(row: &QueryResult) -> SysdbResult<Collection> {
    Ok(Collection {
        id: CollectionId(read_id(row, Collections::Id)?),
        name: row.try_get("", &col_name(Collections::Name))?,
        tenant: row.try_get("", &col_name(Collections::Tenant))?,
        database_id: DatabaseId(read_id(row, Collections::DatabaseId)?),
        configuration_json: row.try_get("", &col_name(Collections::ConfigurationJson))?,
        schema_json: row.try_get("", &col_name(Collections::SchemaJson))?,
        dimension: row.try_get("", &col_name(Collections::Dimension))?,
        log_position: row.try_get("", &col_name(Collections::LogPosition))?,
        version: row.try_get("", &col_name(Collections::Version))?,
        version_file_name: row.try_get("", &col_name(Collections::VersionFileName))?,
        root_collection_id: read_opt_id(row, Collections::RootCollectionId)?.map(CollectionId),
        lineage_file_name: row.try_get("", &col_name(Collections::LineageFileName))?,
        total_records_post_compaction: row
            .try_get("", &col_name(Collections::TotalRecordsPostCompaction))?,
        size_bytes_post_compaction: row
            .try_get("", &col_name(Collections::SizeBytesPostCompaction))?,
        last_compaction_time_secs: row
            .try_get("", &col_name(Collections::LastCompactionTimeSecs))?,
        num_versions: row.try_get("", &col_name(Collections::NumVersions))?,
        oldest_version_ts: read_opt_timestamp(row, Collections::OldestVersionTs)?,
        is_deleted: row.try_get("", &col_name(Collections::IsDeleted))?,
        created_at: read_timestamp(row, Collections::CreatedAt)?,
        updated_at: read_timestamp(row, Collections::UpdatedAt)?,
    })
}

#[derive(Clone, Debug)]
pub(crate) struct GcCandidate {
    pub id: Id,
    pub root_collection_id: Option<Id>,
    pub oldest_version_ts: Option<i64>,
    pub num_versions: i64,
    pub is_deleted: bool,
}

#[derive(Default)]
struct ForkTreeStats {
    min_oldest_version_ts: Option<i64>,
    max_num_versions: i64,
    any_deleted: bool,
}

/// Groups rows by fork-tree root and returns the eligible roots with their
/// tree-wide version count, most versions first.
pub(crate) fn eligible_fork_trees(
    candidates: &[GcCandidate],
    cutoff: Timestamp,
    min_versions: i64,
) -> Vec<(Id, i64)> {
    let mut trees: HashMap<Id, ForkTreeStats> = HashMap::new();
    for candidate in candidates {
        let root = candidate.root_collection_id.unwrap_or(candidate.id);
        let stats = trees.entry(root).or_default();
        if let Some(ts) = candidate.oldest_version_ts {
            stats.min_oldest_version_ts =
                Some(stats.min_oldest_version_ts.map_or(ts, |min| Ord::min(min, ts)));
        }
        stats.max_num_versions = Ord::max(stats.max_num_versions, candidate.num_versions);
        stats.any_deleted |= candidate.is_deleted;
    }
    let mut eligible = trees
        .into_iter()
        .filter(|(_, stats)| {
            stats
                .min_oldest_version_ts
                .is_some_and(|min| min < cutoff.as_micros())
                && (stats.max_num_versions >= min_versions || stats.any_deleted)
        })
        .map(|(root, stats)| (root, stats.max_num_versions))
        .collect::<Vec<_>>();
    eligible.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    eligible
}

#[async_trait]
impl CollectionApi for CollectionStore {
    async fn get_collection(&self, id: CollectionId) -> SysdbResult<Collection> {
        self.require_in(&self.conn, id).await
    }

    async fn get_collection_with_metadata(
        &self,
        id: CollectionId,
    ) -> SysdbResult<CollectionWithMetadata> {
        let collection = self.require_in(&self.conn, id).await?;
        let mut metadata = self.fetch_metadata_in(&self.conn, &[id.0]).await?;
        Ok(CollectionWithMetadata {
            collection,
            metadata: metadata.remove(&id.0).unwrap_or_default(),
        })
    }

    async fn list_collections(&self, input: ListCollectionsInput) -> SysdbResult<Vec<Collection>> {
        let mut select = self.scoped_select(&input.tenant, input.database_name.as_deref());
        if let Some(name) = &input.name {
            select.and_where(Expr::col(Collections::Name).eq(name.as_str()));
        }
        select
            .order_by(Collections::CreatedAt, Order::Asc)
            .order_by(Collections::Id, Order::Asc);
        paginate(&mut select, input.limit, input.offset);
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(collection_from_row).collect()
    }

    async fn list_collections_with_metadata(
        &self,
        input: ListCollectionsInput,
    ) -> SysdbResult<Vec<CollectionWithMetadata>> {
        let collections = self.list_collections(input).await?;
        let ids = collections.iter().map(|c| c.id.0).collect::<Vec<_>>();
        let mut metadata = self.fetch_metadata_in(&self.conn, &ids).await?;
        Ok(collections
            .into_iter()
            .map(|collection| {
                let metadata = metadata.remove(&collection.id.0).unwrap_or_default();
                CollectionWithMetadata {
                    collection,
                    metadata,
                }
            })
            .collect())
    }

    async fn count_collections(
        &self,
        tenant: &str,
        database_name: Option<&str>,
    ) -> SysdbResult<u64> {
        let mut select = Query::select()
            .from(Collections::Table)
            .expr_as(Func::count(Expr::col(Collections::Id)), Alias::new("total"))
            .and_where(Expr::col(Collections::Tenant).eq(tenant))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .to_owned();
        if let Some(database_name) = database_name {
            select.and_where(
                Expr::col(Collections::DatabaseId).in_subquery(database_ids(tenant, database_name)),
            );
        }
        let total: i64 = match query_one(&self.conn, &select).await? {
            Some(row) => row.try_get("", "total")?,
            None => 0,
        };
        Ok(Ord::max(total, 0) as u64)
    }

    async fn get_collection_size(&self, id: CollectionId) -> SysdbResult<i64> {
        Ok(self
            .require_in(&self.conn, id)
            .await?
            .total_records_post_compaction)
    }

    async fn update_version_and_log(&self, input: UpdateVersionAndLogInput) -> SysdbResult<i64> {
        let id = input.collection_id;
        if input.new_version != input.current_version + 1 {
            log::warn!(
                "collection {id}: rejected version jump {} -> {}",
                input.current_version,
                input.new_version
            );
            return Err(SysdbError::version_invalid(format!(
                "collection {id}: new version {} must follow {}",
                input.new_version, input.current_version
            )));
        }
        let file_name_matches = match &input.current_version_file_name {
            Some(file_name) => Expr::col(Collections::VersionFileName)
                .is_null()
                .or(Expr::col(Collections::VersionFileName).eq(file_name.as_str())),
            None => Expr::col(Collections::VersionFileName).is_null(),
        };
        let mut update = Query::update()
            .table(Collections::Table)
            .values([
                (Collections::LogPosition, input.log_position.into()),
                (Collections::Version, input.new_version.into()),
                (
                    Collections::VersionFileName,
                    input.new_version_file_name.as_str().into(),
                ),
                (
                    Collections::TotalRecordsPostCompaction,
                    input.total_records_post_compaction.into(),
                ),
                (
                    Collections::SizeBytesPostCompaction,
                    input.size_bytes_post_compaction.into(),
                ),
                (
                    Collections::LastCompactionTimeSecs,
                    input.last_compaction_time_secs.into(),
                ),
                (Collections::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .and_where(Expr::col(Collections::Version).eq(input.current_version))
            .and_where(file_name_matches)
            .and_where(Expr::col(Collections::LogPosition).lte(input.log_position))
            .to_owned();
        if let Some(num_versions) = input.num_versions {
            update.value(Collections::NumVersions, num_versions);
        }
        if let Some(oldest_version_ts) = input.oldest_version_ts {
            update.value(Collections::OldestVersionTs, oldest_version_ts.as_micros());
        }
        if let Some(schema_json) = &input.schema_json {
            update.value(Collections::SchemaJson, schema_json.as_str());
        }
        if exec_rows(&self.conn, &update).await? == 0 {
            return Err(self
                .classify_conflict(id, input.log_position, input.current_version)
                .await);
        }
        Ok(input.new_version)
    }

    async fn update_log_position_and_version(
        &self,
        id: CollectionId,
        log_position: i64,
        current_version: i64,
    ) -> SysdbResult<i64> {
        let tx = self.conn.begin().await?;
        let version = self
            .update_log_position_and_version_in(&tx, id, log_position, current_version)
            .await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn update_lineage_file_name(
        &self,
        id: CollectionId,
        current_lineage_file_name: Option<&str>,
        new_lineage_file_name: &str,
    ) -> SysdbResult<()> {
        let current_matches = match current_lineage_file_name {
            Some(current) => Expr::col(Collections::LineageFileName).eq(current),
            None => Expr::col(Collections::LineageFileName).is_null(),
        };
        let update = Query::update()
            .table(Collections::Table)
            .values([
                (Collections::LineageFileName, new_lineage_file_name.into()),
                (Collections::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(false))
            .and_where(current_matches)
            .to_owned();
        if exec_rows(&self.conn, &update).await? > 0 {
            return Ok(());
        }
        let stored = self.require_in(&self.conn, id).await?;
        log::debug!(
            "collection {id}: lineage file {:?} does not match stored {:?}",
            current_lineage_file_name,
            stored.lineage_file_name
        );
        Err(SysdbError::version_stale(format!(
            "collection {id}: lineage file name changed concurrently"
        )))
    }

    async fn soft_delete_collection(&self, id: CollectionId) -> SysdbResult<()> {
        if self.soft_delete_in(&self.conn, id).await? {
            log::info!("soft deleted collection {id}");
        }
        Ok(())
    }

    async fn list_soft_deleted_collections(
        &self,
        cutoff: Timestamp,
        limit: Option<u64>,
    ) -> SysdbResult<Vec<Collection>> {
        let mut select = collection_select()
            .and_where(Expr::col(Collections::IsDeleted).eq(true))
            .and_where(Expr::col(Collections::UpdatedAt).lt(cutoff.as_micros()))
            .order_by(Collections::UpdatedAt, Order::Asc)
            .order_by(Collections::Id, Order::Asc)
            .to_owned();
        paginate(&mut select, limit, 0);
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(collection_from_row).collect()
    }

    async fn hard_delete_collection(&self, id: CollectionId) -> SysdbResult<()> {
        let tx = self.conn.begin().await?;
        let Some(stored) = self.fetch_in(&tx, id, true).await? else {
            return Ok(());
        };
        if !stored.is_deleted {
            return Err(SysdbError::invalid(format!(
                "collection {id} must be soft deleted before it is hard deleted"
            )));
        }
        let segments = self.segments.delete_for_collection_in(&tx, id).await?;
        self.clear_metadata_in(&tx, id).await?;
        let delete = Query::delete()
            .from_table(Collections::Table)
            .and_where(Expr::col(Collections::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Collections::IsDeleted).eq(true))
            .to_owned();
        exec(&tx, &delete).await?;
        tx.commit().await?;
        log::info!("hard deleted collection {id} with {segments} segment(s)");
        Ok(())
    }

    async fn list_collections_to_gc(
        &self,
        input: ListCollectionsToGcInput,
    ) -> SysdbResult<Vec<CollectionToGc>> {
        let mut select = Query::select()
            .from(Collections::Table)
            .columns([
                Collections::Id,
                Collections::RootCollectionId,
                Collections::OldestVersionTs,
                Collections::NumVersions,
                Collections::IsDeleted,
            ])
            .to_owned();
        if let Some(tenant) = &input.tenant {
            select.and_where(Expr::col(Collections::Tenant).eq(tenant.as_str()));
        }
        let candidates = query_all(&self.conn, &select)
            .await?
            .iter()
            .map(|row| {
                Ok(GcCandidate {
                    id: read_id(row, Collections::Id)?,
                    root_collection_id: read_opt_id(row, Collections::RootCollectionId)?,
                    oldest_version_ts: row.try_get("", &col_name(Collections::OldestVersionTs))?,
                    num_versions: row.try_get("", &col_name(Collections::NumVersions))?,
                    is_deleted: row.try_get("", &col_name(Collections::IsDeleted))?,
                })
            })
            .collect::<SysdbResult<Vec<_>>>()?;
        let trees = eligible_fork_trees(&candidates, input.cutoff, input.min_versions);
        if trees.is_empty() {
            return Ok(Vec::new());
        }

        let roots = collection_select()
            .and_where(
                Expr::col(Collections::Id)
                    .is_in(trees.iter().map(|(root, _)| id_value(self.backend, *root))),
            )
            .to_owned();
        let mut by_id = query_all(&self.conn, &roots)
            .await?
            .iter()
            .map(|row| collection_from_row(row).map(|c| (c.id.0, c)))
            .collect::<SysdbResult<HashMap<_, _>>>()?;

        let mut selected = Vec::new();
        for (root, max_num_versions) in trees {
            if input.limit.is_some_and(|limit| selected.len() as u64 >= limit) {
                break;
            }
            let Some(collection) = by_id.remove(&root) else {
                continue;
            };
            selected.push(CollectionToGc {
                id: collection.id,
                name: collection.name,
                tenant: collection.tenant,
                version_file_name: collection.version_file_name,
                lineage_file_name: collection.lineage_file_name,
                num_versions: max_num_versions,
                is_deleted: collection.is_deleted,
            });
        }
        log::info!("{} fork tree(s) eligible for gc", selected.len());
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::{GcCandidate, eligible_fork_trees};
    use sysdb_core::{Id, Timestamp};

    fn candidate(id: Id, root: Option<Id>, ts: Option<i64>, versions: i64) -> GcCandidate {
        GcCandidate {
            id,
            root_collection_id: root,
            oldest_version_ts: ts,
            num_versions: versions,
            is_deleted: false,
        }
    }

    #[test]
    fn fork_tree_is_one_unit() {
        let root = Id::new();
        let rows = vec![
            candidate(root, None, Some(10), 2),
            candidate(Id::new(), Some(root), Some(5), 8),
            candidate(Id::new(), Some(root), Some(20), 1),
        ];
        let trees = eligible_fork_trees(&rows, Timestamp::from_micros(100), 5);
        assert_eq!(trees, vec![(root, 8)]);
    }

    #[test]
    fn tree_below_floor_is_skipped_unless_deleted() {
        let root = Id::new();
        let mut rows = vec![
            candidate(root, None, Some(10), 2),
            candidate(Id::new(), Some(root), Some(5), 3),
        ];
        assert!(eligible_fork_trees(&rows, Timestamp::from_micros(100), 5).is_empty());

        rows[1].is_deleted = true;
        assert_eq!(
            eligible_fork_trees(&rows, Timestamp::from_micros(100), 5),
            vec![(root, 3)]
        );
    }

    #[test]
    fn recent_or_unversioned_trees_are_skipped() {
        let recent = Id::new();
        let unversioned = Id::new();
        let rows = vec![
            candidate(recent, None, Some(500), 9),
            candidate(unversioned, None, None, 9),
        ];
        assert!(eligible_fork_trees(&rows, Timestamp::from_micros(100), 1).is_empty());
    }

    #[test]
    fn trees_are_ordered_by_version_count() {
        let small = Id::new();
        let large = Id::new();
        let rows = vec![
            candidate(small, None, Some(1), 3),
            candidate(large, None, Some(1), 7),
        ];
        let trees = eligible_fork_trees(&rows, Timestamp::from_micros(100), 1);
        assert_eq!(trees, vec![(large, 7), (small, 3)]);
    }
}
