use async_trait::async_trait;
use sea_orm::sea_query::{Cond, Condition, Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, TransactionTrait};

use crate::db::{Collections, Databases, Tenants};
use crate::sql::{
    col_name, deleted_marker_name, exec_rows, id_value, paginate, query_all, query_one, read_id,
    read_timestamp,
};
use sysdb_core::{
    CreateDatabaseInput, Database, DatabaseApi, DatabaseId, SysdbError, SysdbResult, Timestamp,
};

#[derive(Clone)]
pub struct DatabaseStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    deletion_batch_size: usize,
}

impl DatabaseStore {
    pub(crate) fn new(conn: DatabaseConnection, deletion_batch_size: usize) -> Self {
        let backend = conn.get_database_backend();
        Self {
            conn,
            backend,
            deletion_batch_size: deletion_batch_size.max(1),
        }
    }

    pub(crate) async fn fetch_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        tenant: &str,
        name: &str,
    ) -> SysdbResult<Option<Database>> {
        let select = database_select()
            .and_where(Expr::col(Databases::TenantId).eq(tenant))
            .and_where(Expr::col(Databases::Name).eq(name))
            .and_where(Expr::col(Databases::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| database_from_row(&row))
            .transpose()
    }
}

/// Soft-deleted databases past the cutoff that no collection row still
/// references.
fn reapable(cutoff: Timestamp) -> Condition {
    let referencing = Query::select()
        .expr(Expr::val(1))
        .from(Collections::Table)
        .and_where(
            Expr::col((Collections::Table, Collections::DatabaseId))
                .equals((Databases::Table, Databases::Id)),
        )
        .to_owned();
    Cond::all()
        .add(Expr::col((Databases::Table, Databases::IsDeleted)).eq(true))
        .add(Expr::col((Databases::Table, Databases::UpdatedAt)).lt(cutoff.as_micros()))
        .add(Expr::exists(referencing).not())
}

fn database_select() -> SelectStatement {
    Query::select()
        .from(Databases::Table)
        .columns([
            Databases::Id,
            Databases::Name,
            Databases::TenantId,
            Databases::IsDeleted,
            Databases::CreatedAt,
            Databases::UpdatedAt,
        ])
        .to_owned()
}

fn database_from_row(row: &QueryResult) -> SysdbResult<Database> {
    Ok(Database {
        id: DatabaseId(read_id(row, Databases::Id)?),
        name: row.try_get("", &col_name(Databases::Name))?,
        tenant: row.try_get("", &col_name(Databases::TenantId))?,
        is_deleted: row.try_get("", &col_name(Databases::IsDeleted))?,
        created_at: read_timestamp(row, Databases::CreatedAt)?,
        updated_at: read_timestamp(row, Databases::UpdatedAt)?,
    })
}

#[async_trait]
impl DatabaseApi for DatabaseStore {
    async fn create_database(&self, input: CreateDatabaseInput) -> SysdbResult<Database> {
        if input.name.is_empty() {
            return Err(SysdbError::invalid("database name must not be empty"));
        }
        let tx = self.conn.begin().await?;
        let tenant = Query::select()
            .from(Tenants::Table)
            .column(Tenants::Id)
            .and_where(Expr::col(Tenants::Id).eq(input.tenant.as_str()))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        if query_one(&tx, &tenant).await?.is_none() {
            return Err(SysdbError::not_found(format!("tenant {}", input.tenant)));
        }
        let id = input.id.unwrap_or_default();
        let now = Timestamp::now();
        let insert = Query::insert()
            .into_table(Databases::Table)
            .columns([
                Databases::Id,
                Databases::Name,
                Databases::TenantId,
                Databases::IsDeleted,
                Databases::CreatedAt,
                Databases::UpdatedAt,
            ])
            .values_panic([
                id_value(self.backend, id.0).into(),
                input.name.clone().into(),
                input.tenant.clone().into(),
                false.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec_rows(&tx, &insert).await.map_err(|err| {
            err.or_already_exists(format!("database {}/{}", input.tenant, input.name))
        })?;
        tx.commit().await?;
        log::info!("created database {}/{} ({id})", input.tenant, input.name);
        Ok(Database {
            id,
            name: input.name,
            tenant: input.tenant,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_database(&self, tenant: &str, name: &str) -> SysdbResult<Database> {
        self.fetch_by_name(&self.conn, tenant, name)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("database {tenant}/{name}")))
    }

    async fn get_database_by_id(&self, id: DatabaseId) -> SysdbResult<Database> {
        let select = database_select()
            .and_where(Expr::col(Databases::Id).eq(id_value(self.backend, id.0)))
            .and_where(Expr::col(Databases::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        let row = query_one(&self.conn, &select)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("database {id}")))?;
        database_from_row(&row)
    }

    async fn list_databases(
        &self,
        tenant: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> SysdbResult<Vec<Database>> {
        let mut select = database_select()
            .and_where(Expr::col(Databases::TenantId).eq(tenant))
            .and_where(Expr::col(Databases::IsDeleted).eq(false))
            .order_by(Databases::CreatedAt, Order::Asc)
            .order_by(Databases::Name, Order::Asc)
            .to_owned();
        paginate(&mut select, limit, offset);
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(database_from_row).collect()
    }

    async fn soft_delete_database(&self, tenant: &str, name: &str) -> SysdbResult<()> {
        let Some(database) = self.fetch_by_name(&self.conn, tenant, name).await? else {
            return Ok(());
        };
        let update = Query::update()
            .table(Databases::Table)
            .values([
                (
                    Databases::Name,
                    deleted_marker_name(&database.name, database.id.0).into(),
                ),
                (Databases::IsDeleted, true.into()),
                (Databases::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Databases::Id).eq(id_value(self.backend, database.id.0)))
            .and_where(Expr::col(Databases::IsDeleted).eq(false))
            .to_owned();
        let affected = exec_rows(&self.conn, &update).await?;
        log::info!("soft deleted database {tenant}/{name}: {affected} row(s)");
        Ok(())
    }

    async fn finish_database_deletion(&self, cutoff: Timestamp) -> SysdbResult<u64> {
        let mut removed = 0u64;
        loop {
            let select = Query::select()
                .from(Databases::Table)
                .column((Databases::Table, Databases::Id))
                .cond_where(reapable(cutoff))
                .order_by((Databases::Table, Databases::UpdatedAt), Order::Asc)
                .limit(self.deletion_batch_size as u64)
                .to_owned();
            let rows = query_all(&self.conn, &select).await?;
            if rows.is_empty() {
                break;
            }
            let ids = rows
                .iter()
                .map(|row| read_id(row, Databases::Id))
                .collect::<SysdbResult<Vec<_>>>()?;
            let batch_len = ids.len();
            let delete = Query::delete()
                .from_table(Databases::Table)
                .cond_where(
                    reapable(cutoff).add(
                        Expr::col(Databases::Id)
                            .is_in(ids.iter().map(|id| id_value(self.backend, *id))),
                    ),
                )
                .to_owned();
            let deleted = exec_rows(&self.conn, &delete).await?;
            removed += deleted;
            log::info!("hard deleted {deleted} of {batch_len} soft-deleted database(s)");
            if batch_len < self.deletion_batch_size || deleted == 0 {
                break;
            }
        }
        Ok(removed)
    }
}
