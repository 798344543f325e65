use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, TransactionTrait};

use crate::db::AttachedFunctions;
use crate::sql::{
    col_name, deleted_marker_name, exec_rows, id_value, opt_id_value, paginate, query_all,
    query_one, read_id, read_opt_id, read_opt_timestamp, read_timestamp,
};
use sysdb_core::{
    AdvanceResult, AttachedFunction, AttachedFunctionApi, AttachedFunctionId, CollectionId,
    CreateAttachedFunctionInput, DatabaseId, FunctionId, Nonce, PartialAttachedFunction,
    ScheduleEntry, SysdbError, SysdbResult, Timestamp,
};

const ATTACHED_FUNCTION_COLUMNS: [AttachedFunctions; 19] = [
    AttachedFunctions::Id,
    AttachedFunctions::Name,
    AttachedFunctions::FunctionId,
    AttachedFunctions::Tenant,
    AttachedFunctions::DatabaseId,
    AttachedFunctions::InputCollectionId,
    AttachedFunctions::OutputCollectionId,
    AttachedFunctions::OutputCollectionName,
    AttachedFunctions::Params,
    AttachedFunctions::CompletionOffset,
    AttachedFunctions::MinRecordsForInvocation,
    AttachedFunctions::CurrentAttempts,
    AttachedFunctions::NextRun,
    AttachedFunctions::LastRun,
    AttachedFunctions::NextNonce,
    AttachedFunctions::LowestLiveNonce,
    AttachedFunctions::IsDeleted,
    AttachedFunctions::CreatedAt,
    AttachedFunctions::UpdatedAt,
];

#[derive(Clone)]
pub struct AttachedFunctionStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    cleanup_batch_size: usize,
}

impl AttachedFunctionStore {
    pub(crate) fn new(conn: DatabaseConnection, cleanup_batch_size: usize) -> Self {
        let backend = conn.get_database_backend();
        Self {
            conn,
            backend,
            cleanup_batch_size: cleanup_batch_size.max(1),
        }
    }

    pub(crate) async fn fetch_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: AttachedFunctionId,
        include_deleted: bool,
    ) -> SysdbResult<Option<AttachedFunction>> {
        let mut select = attached_function_select();
        select
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .limit(1);
        if !include_deleted {
            select.and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false));
        }
        query_one(conn, &select)
            .await?
            .map(|row| attached_function_from_row(&row))
            .transpose()
    }

    pub(crate) async fn fetch_by_name_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        input_collection_id: CollectionId,
        name: &str,
    ) -> SysdbResult<Option<AttachedFunction>> {
        let select = attached_function_select()
            .and_where(
                Expr::col(AttachedFunctions::InputCollectionId)
                    .eq(id_value(self.backend, input_collection_id.0)),
            )
            .and_where(Expr::col(AttachedFunctions::Name).eq(name))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| attached_function_from_row(&row))
            .transpose()
    }

    /// Marks a live row deleted and frees its name. Returns whether this call
    /// performed the transition.
    pub(crate) async fn soft_delete_row_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        attached: &AttachedFunction,
    ) -> SysdbResult<bool> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::Name,
                    deleted_marker_name(&attached.name, attached.id.0).into(),
                ),
                (AttachedFunctions::IsDeleted, true.into()),
                (AttachedFunctions::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, attached.id.0)))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        Ok(exec_rows(conn, &update).await? > 0)
    }

    /// Soft-deletes every live attached function reading from the collection,
    /// including rows still being created.
    pub(crate) async fn soft_delete_for_collection_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        input_collection_id: CollectionId,
    ) -> SysdbResult<Vec<AttachedFunction>> {
        let select = attached_function_select()
            .and_where(
                Expr::col(AttachedFunctions::InputCollectionId)
                    .eq(id_value(self.backend, input_collection_id.0)),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .order_by(AttachedFunctions::Id, Order::Asc)
            .to_owned();
        let rows = query_all(conn, &select).await?;
        let mut deleted = Vec::with_capacity(rows.len());
        for row in rows {
            let attached = attached_function_from_row(&row)?;
            if self.soft_delete_row_in(conn, &attached).await? {
                deleted.push(attached);
            }
        }
        Ok(deleted)
    }

    pub(crate) fn cleanup_batch_size(&self) -> usize {
        self.cleanup_batch_size
    }

    /// Live rows that never finished creation and were last touched at or
    /// before `now - max_age`, oldest first, with the cutoff used.
    pub(crate) async fn expired_partials(
        &self,
        max_age: Duration,
    ) -> SysdbResult<(Timestamp, Vec<AttachedFunction>)> {
        let cutoff = Timestamp::now().saturating_sub(max_age);
        let select = attached_function_select()
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_null())
            .and_where(Expr::col(AttachedFunctions::UpdatedAt).lte(cutoff.as_micros()))
            .order_by(AttachedFunctions::UpdatedAt, Order::Asc)
            .to_owned();
        let expired = query_all(&self.conn, &select)
            .await?
            .iter()
            .map(attached_function_from_row)
            .collect::<SysdbResult<Vec<_>>>()?;
        Ok((cutoff, expired))
    }

    /// Soft-deletes one partial row if it is still partial and expired.
    pub(crate) async fn cleanup_partial_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        attached: &AttachedFunction,
        cutoff: Timestamp,
    ) -> SysdbResult<Option<PartialAttachedFunction>> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::Name,
                    deleted_marker_name(&attached.name, attached.id.0).into(),
                ),
                (AttachedFunctions::IsDeleted, true.into()),
                (AttachedFunctions::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, attached.id.0)))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_null())
            .and_where(Expr::col(AttachedFunctions::UpdatedAt).lte(cutoff.as_micros()))
            .to_owned();
        if exec_rows(conn, &update).await? == 0 {
            return Ok(None);
        }
        Ok(Some(PartialAttachedFunction {
            id: attached.id,
            output_collection_id: attached.output_collection_id,
        }))
    }

    fn ready(attached: Option<AttachedFunction>, what: String) -> SysdbResult<AttachedFunction> {
        let attached = attached.ok_or_else(|| SysdbError::not_found(what.clone()))?;
        if !attached.is_ready() {
            return Err(SysdbError::not_ready(format!("{what} is still being created")));
        }
        Ok(attached)
    }
}

fn attached_function_select() -> SelectStatement {
    Query::select()
        .from(AttachedFunctions::Table)
        .columns(ATTACHED_FUNCTION_COLUMNS)
        .to_owned()
}

fn attached_function_from_row(row: &QueryResult) -> SysdbResult<AttachedFunction> {
    Ok(AttachedFunction {
        id: AttachedFunctionId(read_id(row, AttachedFunctions::Id)?),
        name: row.try_get("", &col_name(AttachedFunctions::Name))?,
        function_id: FunctionId(read_id(row, AttachedFunctions::FunctionId)?),
        tenant: row.try_get("", &col_name(AttachedFunctions::Tenant))?,
        database_id: DatabaseId(read_id(row, AttachedFunctions::DatabaseId)?),
        input_collection_id: CollectionId(read_id(row, AttachedFunctions::InputCollectionId)?),
        output_collection_id: read_opt_id(row, AttachedFunctions::OutputCollectionId)?
            .map(CollectionId),
        output_collection_name: row
            .try_get("", &col_name(AttachedFunctions::OutputCollectionName))?,
        params: row.try_get("", &col_name(AttachedFunctions::Params))?,
        completion_offset: row.try_get("", &col_name(AttachedFunctions::CompletionOffset))?,
        min_records_for_invocation: row
            .try_get("", &col_name(AttachedFunctions::MinRecordsForInvocation))?,
        current_attempts: row.try_get("", &col_name(AttachedFunctions::CurrentAttempts))?,
        next_run: read_timestamp(row, AttachedFunctions::NextRun)?,
        last_run: read_opt_timestamp(row, AttachedFunctions::LastRun)?,
        next_nonce: Nonce(read_id(row, AttachedFunctions::NextNonce)?),
        lowest_live_nonce: read_opt_id(row, AttachedFunctions::LowestLiveNonce)?.map(Nonce),
        is_deleted: row.try_get("", &col_name(AttachedFunctions::IsDeleted))?,
        created_at: read_timestamp(row, AttachedFunctions::CreatedAt)?,
        updated_at: read_timestamp(row, AttachedFunctions::UpdatedAt)?,
    })
}

#[async_trait]
impl AttachedFunctionApi for AttachedFunctionStore {
    async fn insert_attached_function(
        &self,
        input: CreateAttachedFunctionInput,
    ) -> SysdbResult<AttachedFunction> {
        if input.name.is_empty() {
            return Err(SysdbError::invalid("attached function name must not be empty"));
        }
        if input.min_records_for_invocation < 0 {
            return Err(SysdbError::invalid(
                "min_records_for_invocation must not be negative",
            ));
        }
        let now = Timestamp::now();
        let attached = AttachedFunction {
            id: input.id.unwrap_or_default(),
            name: input.name,
            function_id: input.function_id,
            tenant: input.tenant,
            database_id: input.database_id,
            input_collection_id: input.input_collection_id,
            output_collection_id: None,
            output_collection_name: input.output_collection_name,
            params: input.params,
            completion_offset: 0,
            min_records_for_invocation: input.min_records_for_invocation,
            current_attempts: 0,
            next_run: now,
            last_run: None,
            next_nonce: Nonce::generate(),
            lowest_live_nonce: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        let insert = Query::insert()
            .into_table(AttachedFunctions::Table)
            .columns(ATTACHED_FUNCTION_COLUMNS)
            .values_panic([
                id_value(self.backend, attached.id.0).into(),
                attached.name.clone().into(),
                id_value(self.backend, attached.function_id.0).into(),
                attached.tenant.clone().into(),
                id_value(self.backend, attached.database_id.0).into(),
                id_value(self.backend, attached.input_collection_id.0).into(),
                opt_id_value(self.backend, None).into(),
                attached.output_collection_name.clone().into(),
                attached.params.clone().into(),
                attached.completion_offset.into(),
                attached.min_records_for_invocation.into(),
                attached.current_attempts.into(),
                attached.next_run.as_micros().into(),
                None::<i64>.into(),
                id_value(self.backend, attached.next_nonce.0).into(),
                opt_id_value(self.backend, None).into(),
                false.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec_rows(&self.conn, &insert).await.map_err(|err| {
            err.or_already_exists(format!(
                "attached function {} on collection {}",
                attached.name, attached.input_collection_id
            ))
        })?;
        log::info!(
            "inserted attached function {} ({}) on collection {}",
            attached.name,
            attached.id,
            attached.input_collection_id
        );
        Ok(attached)
    }

    async fn set_output_collection(
        &self,
        id: AttachedFunctionId,
        output_collection_id: CollectionId,
    ) -> SysdbResult<()> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::OutputCollectionId,
                    id_value(self.backend, output_collection_id.0).into(),
                ),
                (AttachedFunctions::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_null())
            .to_owned();
        if exec_rows(&self.conn, &update).await? > 0 {
            return Ok(());
        }
        match self.fetch_in(&self.conn, id, false).await? {
            None => Err(SysdbError::not_found(format!("attached function {id}"))),
            Some(stored) if stored.output_collection_id == Some(output_collection_id) => Ok(()),
            Some(_) => Err(SysdbError::invalid(format!(
                "attached function {id} is already initialized"
            ))),
        }
    }

    async fn finish_attached_function_creation(&self, id: AttachedFunctionId) -> SysdbResult<()> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .value(
                AttachedFunctions::LowestLiveNonce,
                Expr::col(AttachedFunctions::NextNonce),
            )
            .value(AttachedFunctions::UpdatedAt, Timestamp::now().as_micros())
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_null())
            .to_owned();
        if exec_rows(&self.conn, &update).await? > 0 {
            log::info!("attached function {id} initialized");
            return Ok(());
        }
        match self.fetch_in(&self.conn, id, false).await? {
            None => Err(SysdbError::not_found(format!("attached function {id}"))),
            Some(_) => {
                log::debug!("attached function {id} was already initialized");
                Ok(())
            }
        }
    }

    async fn get_attached_function_by_name(
        &self,
        input_collection_id: CollectionId,
        name: &str,
    ) -> SysdbResult<AttachedFunction> {
        let attached = self
            .fetch_by_name_in(&self.conn, input_collection_id, name)
            .await?;
        Self::ready(
            attached,
            format!("attached function {name} on collection {input_collection_id}"),
        )
    }

    async fn get_attached_function_by_id(
        &self,
        id: AttachedFunctionId,
    ) -> SysdbResult<AttachedFunction> {
        let attached = self.fetch_in(&self.conn, id, false).await?;
        Self::ready(attached, format!("attached function {id}"))
    }

    async fn list_attached_functions(
        &self,
        input_collection_id: CollectionId,
    ) -> SysdbResult<Vec<AttachedFunction>> {
        let select = attached_function_select()
            .and_where(
                Expr::col(AttachedFunctions::InputCollectionId)
                    .eq(id_value(self.backend, input_collection_id.0)),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_not_null())
            .order_by(AttachedFunctions::Name, Order::Asc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(attached_function_from_row).collect()
    }

    async fn advance_attached_function(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
        completion_offset: i64,
        next_run_delay: Duration,
    ) -> SysdbResult<AdvanceResult> {
        let now = Timestamp::now();
        let next_nonce = Nonce::generate();
        let next_run = now.saturating_add(next_run_delay);
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::NextNonce,
                    id_value(self.backend, next_nonce.0).into(),
                ),
                (AttachedFunctions::CompletionOffset, completion_offset.into()),
                (AttachedFunctions::NextRun, next_run.as_micros().into()),
                (AttachedFunctions::LastRun, now.as_micros().into()),
                (AttachedFunctions::CurrentAttempts, 0i32.into()),
                (
                    AttachedFunctions::UpdatedAt,
                    Expr::case(
                        Expr::col(AttachedFunctions::UpdatedAt).gt(now.as_micros()),
                        Expr::col(AttachedFunctions::UpdatedAt),
                    )
                    .finally(now.as_micros())
                    .into(),
                ),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(
                Expr::col(AttachedFunctions::NextNonce)
                    .eq(id_value(self.backend, expected_next_nonce.0)),
            )
            .and_where(Expr::col(AttachedFunctions::CompletionOffset).lte(completion_offset))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        if exec_rows(&self.conn, &update).await? == 0 {
            log::debug!(
                "attached function {id}: advance from nonce {expected_next_nonce} to offset {completion_offset} rejected"
            );
            return Err(SysdbError::not_found(format!(
                "attached function {id} with nonce {expected_next_nonce}"
            )));
        }
        Ok(AdvanceResult {
            next_nonce,
            completion_offset,
            next_run,
        })
    }

    async fn update_completion_offset(
        &self,
        id: AttachedFunctionId,
        run_nonce: Nonce,
        completion_offset: i64,
    ) -> SysdbResult<()> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (AttachedFunctions::CompletionOffset, completion_offset.into()),
                (AttachedFunctions::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(
                Expr::col(AttachedFunctions::LowestLiveNonce).eq(id_value(self.backend, run_nonce.0)),
            )
            .and_where(Expr::col(AttachedFunctions::CompletionOffset).lte(completion_offset))
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        if exec_rows(&self.conn, &update).await? == 0 {
            log::debug!("attached function {id}: completion offset update for run {run_nonce} rejected");
            return Err(SysdbError::not_found(format!(
                "attached function {id} with live nonce {run_nonce}"
            )));
        }
        Ok(())
    }

    async fn finish_attached_function(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
    ) -> SysdbResult<()> {
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::LowestLiveNonce,
                    id_value(self.backend, expected_next_nonce.0).into(),
                ),
                (AttachedFunctions::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(
                Expr::col(AttachedFunctions::NextNonce)
                    .eq(id_value(self.backend, expected_next_nonce.0)),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        if exec_rows(&self.conn, &update).await? == 0 {
            log::debug!("attached function {id}: finish with nonce {expected_next_nonce} rejected");
            return Err(SysdbError::not_found(format!(
                "attached function {id} with nonce {expected_next_nonce}"
            )));
        }
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
        retry_delay: Duration,
    ) -> SysdbResult<i32> {
        let now = Timestamp::now();
        let tx = self.conn.begin().await?;
        let update = Query::update()
            .table(AttachedFunctions::Table)
            .values([
                (
                    AttachedFunctions::CurrentAttempts,
                    Expr::col(AttachedFunctions::CurrentAttempts).add(1),
                ),
                (
                    AttachedFunctions::NextRun,
                    now.saturating_add(retry_delay).as_micros().into(),
                ),
                (AttachedFunctions::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(
                Expr::col(AttachedFunctions::NextNonce)
                    .eq(id_value(self.backend, expected_next_nonce.0)),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        if exec_rows(&tx, &update).await? == 0 {
            return Err(SysdbError::not_found(format!(
                "attached function {id} with nonce {expected_next_nonce}"
            )));
        }
        let stored = self
            .fetch_in(&tx, id, false)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("attached function {id}")))?;
        tx.commit().await?;
        log::debug!(
            "attached function {id}: attempt {} failed, retry at {}",
            stored.current_attempts,
            stored.next_run.as_micros()
        );
        Ok(stored.current_attempts)
    }

    async fn soft_delete_attached_function(
        &self,
        input_collection_id: CollectionId,
        name: &str,
    ) -> SysdbResult<()> {
        let Some(attached) = self
            .fetch_by_name_in(&self.conn, input_collection_id, name)
            .await?
        else {
            return Ok(());
        };
        if self.soft_delete_row_in(&self.conn, &attached).await? {
            log::info!("soft deleted attached function {name} ({})", attached.id);
        }
        Ok(())
    }

    async fn soft_delete_attached_function_by_id(
        &self,
        id: AttachedFunctionId,
    ) -> SysdbResult<()> {
        let Some(attached) = self.fetch_in(&self.conn, id, false).await? else {
            return Ok(());
        };
        if self.soft_delete_row_in(&self.conn, &attached).await? {
            log::info!("soft deleted attached function {id}");
        }
        Ok(())
    }

    async fn cleanup_expired_partial_attached_functions(
        &self,
        max_age: Duration,
    ) -> SysdbResult<Vec<PartialAttachedFunction>> {
        let (cutoff, expired) = self.expired_partials(max_age).await?;
        let mut cleaned = Vec::with_capacity(expired.len());
        for batch in expired.chunks(self.cleanup_batch_size) {
            let tx = self.conn.begin().await?;
            for attached in batch {
                if let Some(partial) = self.cleanup_partial_in(&tx, attached, cutoff).await? {
                    cleaned.push(partial);
                }
            }
            tx.commit().await?;
        }
        if !cleaned.is_empty() {
            log::info!(
                "cleaned up {} partially created attached function(s)",
                cleaned.len()
            );
        }
        Ok(cleaned)
    }

    async fn get_attached_functions_to_gc(
        &self,
        cutoff: Timestamp,
        limit: Option<u64>,
    ) -> SysdbResult<Vec<AttachedFunction>> {
        let mut select = attached_function_select()
            .and_where(
                Expr::col(AttachedFunctions::IsDeleted)
                    .eq(true)
                    .or(Expr::col(AttachedFunctions::LowestLiveNonce).is_null()),
            )
            .and_where(Expr::col(AttachedFunctions::UpdatedAt).lt(cutoff.as_micros()))
            .order_by(AttachedFunctions::UpdatedAt, Order::Asc)
            .order_by(AttachedFunctions::Id, Order::Asc)
            .to_owned();
        paginate(&mut select, limit, 0);
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(attached_function_from_row).collect()
    }

    async fn hard_delete_attached_function(
        &self,
        id: AttachedFunctionId,
        cutoff: Timestamp,
    ) -> SysdbResult<bool> {
        let delete = Query::delete()
            .from_table(AttachedFunctions::Table)
            .and_where(Expr::col(AttachedFunctions::Id).eq(id_value(self.backend, id.0)))
            .and_where(
                Expr::col(AttachedFunctions::IsDeleted)
                    .eq(true)
                    .or(Expr::col(AttachedFunctions::LowestLiveNonce).is_null()),
            )
            .and_where(Expr::col(AttachedFunctions::UpdatedAt).lt(cutoff.as_micros()))
            .to_owned();
        let deleted = exec_rows(&self.conn, &delete).await? > 0;
        if deleted {
            log::info!("hard deleted attached function {id}");
        } else {
            log::debug!("attached function {id} no longer eligible for hard delete");
        }
        Ok(deleted)
    }

    async fn peek_schedule_by_collection_id(
        &self,
        collection_ids: &[CollectionId],
    ) -> SysdbResult<Vec<ScheduleEntry>> {
        if collection_ids.is_empty() {
            return Ok(Vec::new());
        }
        let select = attached_function_select()
            .and_where(
                Expr::col(AttachedFunctions::InputCollectionId).is_in(
                    collection_ids
                        .iter()
                        .map(|id| id_value(self.backend, id.0)),
                ),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .and_where(Expr::col(AttachedFunctions::LowestLiveNonce).is_not_null())
            .order_by(AttachedFunctions::NextRun, Order::Asc)
            .order_by(AttachedFunctions::Id, Order::Asc)
            .to_owned();
        let mut entries = Vec::new();
        for row in query_all(&self.conn, &select).await? {
            let attached = attached_function_from_row(&row)?;
            let Some(lowest_live_nonce) = attached.lowest_live_nonce else {
                continue;
            };
            entries.push(ScheduleEntry {
                collection_id: attached.input_collection_id,
                attached_function_id: attached.id,
                next_nonce: attached.next_nonce,
                lowest_live_nonce,
                completion_offset: attached.completion_offset,
                min_records_for_invocation: attached.min_records_for_invocation,
                next_run: attached.next_run,
            });
        }
        Ok(entries)
    }

    async fn get_min_completion_offset_for_collection(
        &self,
        collection_id: CollectionId,
    ) -> SysdbResult<Option<i64>> {
        let select = Query::select()
            .from(AttachedFunctions::Table)
            .expr_as(
                Func::min(Expr::col(AttachedFunctions::CompletionOffset)),
                Alias::new("min_offset"),
            )
            .and_where(
                Expr::col(AttachedFunctions::InputCollectionId)
                    .eq(id_value(self.backend, collection_id.0)),
            )
            .and_where(Expr::col(AttachedFunctions::IsDeleted).eq(false))
            .to_owned();
        match query_one(&self.conn, &select).await? {
            Some(row) => Ok(row.try_get("", "min_offset")?),
            None => Ok(None),
        }
    }
}
