use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, Order, Query};
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryResult};

use crate::db::Tenants;
use crate::sql::{col_name, exec_rows, paginate, query_all, query_one, read_timestamp};
use sysdb_core::{CreateTenantInput, SysdbError, SysdbResult, Tenant, TenantApi, Timestamp};

#[derive(Clone)]
pub struct TenantStore {
    conn: DatabaseConnection,
}

impl TenantStore {
    pub(crate) fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub(crate) async fn update_last_compaction_time_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        last_compaction_time_secs: i64,
    ) -> SysdbResult<()> {
        let update = Query::update()
            .table(Tenants::Table)
            .values([
                (Tenants::LastCompactionTime, last_compaction_time_secs.into()),
                (Tenants::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Tenants::Id).eq(id))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .to_owned();
        if exec_rows(conn, &update).await? == 0 {
            return Err(SysdbError::not_found(format!("tenant {id}")));
        }
        Ok(())
    }

    async fn fetch_tenant<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> SysdbResult<Option<Tenant>> {
        let select = tenant_select()
            .and_where(Expr::col(Tenants::Id).eq(id))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| tenant_from_row(&row))
            .transpose()
    }
}

fn tenant_select() -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .from(Tenants::Table)
        .columns([
            Tenants::Id,
            Tenants::ResourceName,
            Tenants::LastCompactionTime,
            Tenants::CreatedAt,
            Tenants::UpdatedAt,
        ])
        .to_owned()
}

fn tenant_from_row(row: &QueryResult) -> SysdbResult<Tenant> {
    Ok(Tenant {
        id: row.try_get("", &col_name(Tenants::Id))?,
        resource_name: row.try_get("", &col_name(Tenants::ResourceName))?,
        last_compaction_time_secs: row.try_get("", &col_name(Tenants::LastCompactionTime))?,
        created_at: read_timestamp(row, Tenants::CreatedAt)?,
        updated_at: read_timestamp(row, Tenants::UpdatedAt)?,
    })
}

#[async_trait]
impl TenantApi for TenantStore {
    async fn create_tenant(&self, input: CreateTenantInput) -> SysdbResult<Tenant> {
        if input.id.is_empty() {
            return Err(SysdbError::invalid("tenant id must not be empty"));
        }
        let now = Timestamp::now();
        let insert = Query::insert()
            .into_table(Tenants::Table)
            .columns([
                Tenants::Id,
                Tenants::ResourceName,
                Tenants::LastCompactionTime,
                Tenants::IsDeleted,
                Tenants::CreatedAt,
                Tenants::UpdatedAt,
            ])
            .values_panic([
                input.id.clone().into(),
                input.resource_name.clone().into(),
                0i64.into(),
                false.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec_rows(&self.conn, &insert)
            .await
            .map_err(|err| err.or_already_exists(format!("tenant {}", input.id)))?;
        log::info!("created tenant {}", input.id);
        Ok(Tenant {
            id: input.id,
            resource_name: input.resource_name,
            last_compaction_time_secs: 0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_tenant(&self, id: &str) -> SysdbResult<Tenant> {
        self.fetch_tenant(&self.conn, id)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("tenant {id}")))
    }

    async fn list_tenants(&self, limit: Option<u64>, offset: u64) -> SysdbResult<Vec<Tenant>> {
        let mut select = tenant_select()
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .order_by(Tenants::CreatedAt, Order::Asc)
            .order_by(Tenants::Id, Order::Asc)
            .to_owned();
        paginate(&mut select, limit, offset);
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(tenant_from_row).collect()
    }

    async fn set_tenant_resource_name(&self, id: &str, resource_name: &str) -> SysdbResult<()> {
        let update = Query::update()
            .table(Tenants::Table)
            .values([
                (Tenants::ResourceName, resource_name.into()),
                (Tenants::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Tenants::Id).eq(id))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .and_where(Expr::col(Tenants::ResourceName).is_null())
            .to_owned();
        if exec_rows(&self.conn, &update).await? > 0 {
            return Ok(());
        }
        let tenant = self.get_tenant(id).await?;
        match tenant.resource_name.as_deref() {
            Some(existing) if existing == resource_name => Ok(()),
            _ => Err(SysdbError::already_exists(format!(
                "tenant {id} already has a resource name"
            ))),
        }
    }

    async fn update_tenant_last_compaction_time(
        &self,
        id: &str,
        last_compaction_time_secs: i64,
    ) -> SysdbResult<()> {
        self.update_last_compaction_time_in(&self.conn, id, last_compaction_time_secs)
            .await
    }

    async fn get_tenants_last_compaction_time(
        &self,
        ids: &[String],
    ) -> SysdbResult<Vec<(String, i64)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let select = Query::select()
            .from(Tenants::Table)
            .columns([Tenants::Id, Tenants::LastCompactionTime])
            .and_where(Expr::col(Tenants::Id).is_in(ids.iter().cloned()))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .order_by(Tenants::Id, Order::Asc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        let mut times = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("", &col_name(Tenants::Id))?;
            let secs: i64 = row.try_get("", &col_name(Tenants::LastCompactionTime))?;
            times.push((id, secs));
        }
        Ok(times)
    }

    async fn soft_delete_tenant(&self, id: &str) -> SysdbResult<()> {
        let update = Query::update()
            .table(Tenants::Table)
            .values([
                (Tenants::IsDeleted, true.into()),
                (Tenants::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(Tenants::Id).eq(id))
            .and_where(Expr::col(Tenants::IsDeleted).eq(false))
            .to_owned();
        let affected = exec_rows(&self.conn, &update).await?;
        log::debug!("soft delete tenant {id}: {affected} row(s)");
        Ok(())
    }
}
