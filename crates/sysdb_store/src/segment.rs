use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, TransactionTrait};

use crate::db::{SegmentMetadata, Segments};
use crate::sql::{
    col_name, exec, exec_rows, id_value, metadata_columns, query_all, read_id,
    read_metadata_value,
};
use sysdb_core::{
    CollectionId, CreateSegmentInput, FlushSegmentCompaction, GetSegmentsInput, Id, Metadata,
    Segment, SegmentApi, SegmentFilePaths, SegmentId, SegmentScope, SysdbError, SysdbResult,
    Timestamp,
};

#[derive(Clone)]
pub struct SegmentStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
}

impl SegmentStore {
    pub(crate) fn new(conn: DatabaseConnection) -> Self {
        let backend = conn.get_database_backend();
        Self { conn, backend }
    }

    pub(crate) async fn insert_segments_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        collection_id: CollectionId,
        segments: Vec<CreateSegmentInput>,
    ) -> SysdbResult<Vec<Segment>> {
        let now = Timestamp::now().as_micros();
        let mut created = Vec::with_capacity(segments.len());
        for input in segments {
            let id = input.id.unwrap_or_default();
            let insert = Query::insert()
                .into_table(Segments::Table)
                .columns([
                    Segments::Id,
                    Segments::CollectionId,
                    Segments::SegmentType,
                    Segments::Scope,
                    Segments::FilePaths,
                    Segments::CreatedAt,
                    Segments::UpdatedAt,
                ])
                .values_panic([
                    id_value(self.backend, id.0).into(),
                    id_value(self.backend, collection_id.0).into(),
                    input.segment_type.clone().into(),
                    input.scope.as_str().into(),
                    encode_file_paths(&input.file_paths)?.into(),
                    now.into(),
                    now.into(),
                ])
                .to_owned();
            exec(conn, &insert)
                .await
                .map_err(|err| err.or_already_exists(format!("segment {id}")))?;
            self.insert_metadata_in(conn, id, &input.metadata, now).await?;
            created.push(Segment {
                id,
                collection_id,
                segment_type: input.segment_type,
                scope: input.scope,
                file_paths: input.file_paths,
                metadata: input.metadata,
            });
        }
        Ok(created)
    }

    async fn insert_metadata_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        segment_id: SegmentId,
        metadata: &Metadata,
        now: i64,
    ) -> SysdbResult<()> {
        if metadata.is_empty() {
            return Ok(());
        }
        let mut insert = Query::insert()
            .into_table(SegmentMetadata::Table)
            .columns([
                SegmentMetadata::SegmentId,
                SegmentMetadata::Key,
                SegmentMetadata::StrValue,
                SegmentMetadata::IntValue,
                SegmentMetadata::FloatValue,
                SegmentMetadata::BoolValue,
                SegmentMetadata::CreatedAt,
                SegmentMetadata::UpdatedAt,
            ])
            .to_owned();
        for (key, value) in metadata {
            let [str_value, int_value, float_value, bool_value] = metadata_columns(value);
            insert.values_panic([
                id_value(self.backend, segment_id.0).into(),
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

    pub(crate) async fn fetch_segments_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: &GetSegmentsInput,
    ) -> SysdbResult<Vec<Segment>> {
        let mut select = segment_select();
        if let Some(collection_id) = input.collection_id {
            select.and_where(
                Expr::col(Segments::CollectionId).eq(id_value(self.backend, collection_id.0)),
            );
        }
        if let Some(id) = input.id {
            select.and_where(Expr::col(Segments::Id).eq(id_value(self.backend, id.0)));
        }
        if let Some(segment_type) = &input.segment_type {
            select.and_where(Expr::col(Segments::SegmentType).eq(segment_type.as_str()));
        }
        if let Some(scope) = input.scope {
            select.and_where(Expr::col(Segments::Scope).eq(scope.as_str()));
        }
        select.order_by(Segments::Id, Order::Asc);
        let rows = query_all(conn, &select).await?;
        let mut segments = rows
            .iter()
            .map(segment_from_row)
            .collect::<SysdbResult<Vec<_>>>()?;
        let ids = segments.iter().map(|segment| segment.id.0).collect::<Vec<_>>();
        let mut metadata = self.fetch_metadata_in(conn, &ids).await?;
        for segment in &mut segments {
            if let Some(values) = metadata.remove(&segment.id.0) {
                segment.metadata = values;
            }
        }
        Ok(segments)
    }

    async fn fetch_metadata_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        segment_ids: &[Id],
    ) -> SysdbResult<HashMap<Id, Metadata>> {
        let mut grouped: HashMap<Id, Metadata> = HashMap::new();
        if segment_ids.is_empty() {
            return Ok(grouped);
        }
        let select = Query::select()
            .from(SegmentMetadata::Table)
            .columns([
                SegmentMetadata::SegmentId,
                SegmentMetadata::Key,
                SegmentMetadata::StrValue,
                SegmentMetadata::IntValue,
                SegmentMetadata::FloatValue,
                SegmentMetadata::BoolValue,
            ])
            .and_where(
                Expr::col(SegmentMetadata::SegmentId)
                    .is_in(segment_ids.iter().map(|id| id_value(self.backend, *id))),
            )
            .order_by(SegmentMetadata::SegmentId, Order::Asc)
            .order_by(SegmentMetadata::Key, Order::Asc)
            .to_owned();
        for row in query_all(conn, &select).await? {
            let segment_id = read_id(&row, SegmentMetadata::SegmentId)?;
            let key: String = row.try_get("", &col_name(SegmentMetadata::Key))?;
            let value = read_metadata_value(
                &row,
                SegmentMetadata::StrValue,
                SegmentMetadata::IntValue,
                SegmentMetadata::FloatValue,
                SegmentMetadata::BoolValue,
            )?;
            grouped.entry(segment_id).or_default().insert(key, value);
        }
        Ok(grouped)
    }

    /// Replaces the file paths of each listed segment. Every segment must
    /// belong to `collection_id`.
    pub(crate) async fn update_file_paths_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        collection_id: CollectionId,
        segments: &[FlushSegmentCompaction],
    ) -> SysdbResult<()> {
        let now = Timestamp::now().as_micros();
        for segment in segments {
            let update = Query::update()
                .table(Segments::Table)
                .values([
                    (
                        Segments::FilePaths,
                        encode_file_paths(&segment.file_paths)?.into(),
                    ),
                    (Segments::UpdatedAt, now.into()),
                ])
                .and_where(Expr::col(Segments::Id).eq(id_value(self.backend, segment.segment_id.0)))
                .and_where(
                    Expr::col(Segments::CollectionId).eq(id_value(self.backend, collection_id.0)),
                )
                .to_owned();
            if exec_rows(conn, &update).await? == 0 {
                return Err(SysdbError::not_found(format!(
                    "segment {} in collection {collection_id}",
                    segment.segment_id
                )));
            }
        }
        Ok(())
    }

    pub(crate) async fn delete_for_collection_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        collection_id: CollectionId,
    ) -> SysdbResult<u64> {
        let owned = Query::select()
            .column(Segments::Id)
            .from(Segments::Table)
            .and_where(
                Expr::col(Segments::CollectionId).eq(id_value(self.backend, collection_id.0)),
            )
            .to_owned();
        let delete_metadata = Query::delete()
            .from_table(SegmentMetadata::Table)
            .and_where(Expr::col(SegmentMetadata::SegmentId).in_subquery(owned))
            .to_owned();
        exec(conn, &delete_metadata).await?;
        let delete_segments = Query::delete()
            .from_table(Segments::Table)
            .and_where(
                Expr::col(Segments::CollectionId).eq(id_value(self.backend, collection_id.0)),
            )
            .to_owned();
        exec_rows(conn, &delete_segments).await
    }
}

fn segment_select() -> SelectStatement {
    Query::select()
        .from(Segments::Table)
        .columns([
            Segments::Id,
            Segments::CollectionId,
            Segments::SegmentType,
            Segments::Scope,
            Segments::FilePaths,
        ])
        .to_owned()
}

fn segment_from_row(row: &QueryResult) -> SysdbResult<Segment> {
    let scope: String = row.try_get("", &col_name(Segments::Scope))?;
    let file_paths: String = row.try_get("", &col_name(Segments::FilePaths))?;
    Ok(Segment {
        id: SegmentId(read_id(row, Segments::Id)?),
        collection_id: CollectionId(read_id(row, Segments::CollectionId)?),
        segment_type: row.try_get("", &col_name(Segments::SegmentType))?,
        scope: SegmentScope::parse(&scope)
            .ok_or_else(|| SysdbError::storage(format!("unknown segment scope '{scope}'")))?,
        file_paths: decode_file_paths(&file_paths)?,
        metadata: Metadata::new(),
    })
}

fn encode_file_paths(file_paths: &SegmentFilePaths) -> SysdbResult<String> {
    serde_json::to_string(file_paths)
        .map_err(|err| SysdbError::storage(format!("encode file paths: {err}")))
}

fn decode_file_paths(raw: &str) -> SysdbResult<SegmentFilePaths> {
    serde_json::from_str(raw)
        .map_err(|err| SysdbError::storage(format!("decode file paths: {err}")))
}

#[async_trait]
impl SegmentApi for SegmentStore {
    async fn get_segments(&self, input: GetSegmentsInput) -> SysdbResult<Vec<Segment>> {
        self.fetch_segments_in(&self.conn, &input).await
    }

    async fn update_segment_metadata(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
        metadata: Metadata,
    ) -> SysdbResult<()> {
        let tx = self.conn.begin().await?;
        let touch = Query::update()
            .table(Segments::Table)
            .values([(Segments::UpdatedAt, Timestamp::now().as_micros().into())])
            .and_where(Expr::col(Segments::Id).eq(id_value(self.backend, segment_id.0)))
            .and_where(
                Expr::col(Segments::CollectionId).eq(id_value(self.backend, collection_id.0)),
            )
            .to_owned();
        if exec_rows(&tx, &touch).await? == 0 {
            return Err(SysdbError::not_found(format!(
                "segment {segment_id} in collection {collection_id}"
            )));
        }
        let clear = Query::delete()
            .from_table(SegmentMetadata::Table)
            .and_where(Expr::col(SegmentMetadata::SegmentId).eq(id_value(self.backend, segment_id.0)))
            .to_owned();
        exec(&tx, &clear).await?;
        self.insert_metadata_in(&tx, segment_id, &metadata, Timestamp::now().as_micros())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_segment_file_paths(
        &self,
        collection_id: CollectionId,
        segments: Vec<FlushSegmentCompaction>,
    ) -> SysdbResult<()> {
        let tx = self.conn.begin().await?;
        self.update_file_paths_in(&tx, collection_id, &segments).await?;
        tx.commit().await?;
        log::debug!(
            "updated file paths of {} segment(s) in collection {collection_id}",
            segments.len()
        );
        Ok(())
    }
}
