use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult};

use crate::db::Functions;
use crate::sql::{col_name, id_value, query_all, query_one, read_id};
use sysdb_core::{Function, FunctionApi, FunctionId, SysdbError, SysdbResult};

#[derive(Clone)]
pub struct FunctionStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
}

impl FunctionStore {
    pub(crate) fn new(conn: DatabaseConnection) -> Self {
        let backend = conn.get_database_backend();
        Self { conn, backend }
    }
}

fn function_select() -> SelectStatement {
    Query::select()
        .from(Functions::Table)
        .columns([
            Functions::Id,
            Functions::Name,
            Functions::IsIncremental,
            Functions::ReturnType,
        ])
        .to_owned()
}

fn function_from_row(row: &QueryResult) -> SysdbResult<Function> {
    Ok(Function {
        id: FunctionId(read_id(row, Functions::Id)?),
        name: row.try_get("", &col_name(Functions::Name))?,
        is_incremental: row.try_get("", &col_name(Functions::IsIncremental))?,
        return_type: row.try_get("", &col_name(Functions::ReturnType))?,
    })
}

#[async_trait]
impl FunctionApi for FunctionStore {
    async fn get_function_by_name(&self, name: &str) -> SysdbResult<Function> {
        let select = function_select()
            .and_where(Expr::col(Functions::Name).eq(name))
            .limit(1)
            .to_owned();
        let row = query_one(&self.conn, &select)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("function {name}")))?;
        function_from_row(&row)
    }

    async fn get_function_by_id(&self, id: FunctionId) -> SysdbResult<Function> {
        let select = function_select()
            .and_where(Expr::col(Functions::Id).eq(id_value(self.backend, id.0)))
            .limit(1)
            .to_owned();
        let row = query_one(&self.conn, &select)
            .await?
            .ok_or_else(|| SysdbError::not_found(format!("function {id}")))?;
        function_from_row(&row)
    }

    async fn list_functions(&self) -> SysdbResult<Vec<Function>> {
        let select = function_select()
            .order_by(Functions::Name, Order::Asc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(function_from_row).collect()
    }
}
