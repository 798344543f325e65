use sea_orm::sea_query;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SelectStatement,
    SqliteQueryBuilder, Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};
use uuid::Uuid;

use sysdb_core::{Id, MetadataValue, SysdbError, SysdbResult, Timestamp};

pub(crate) fn id_value(backend: DatabaseBackend, id: Id) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => {
            let uuid = Uuid::from_bytes(id.as_bytes());
            SeaValue::Uuid(Some(uuid))
        }
        DatabaseBackend::MySql => SeaValue::Bytes(Some(id.as_vec())),
        DatabaseBackend::Sqlite => SeaValue::String(Some(id.to_uuid_string())),
        _ => SeaValue::String(Some(id.to_uuid_string())),
    }
}

pub(crate) fn none_id_value(backend: DatabaseBackend) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => SeaValue::Uuid(None),
        DatabaseBackend::MySql => SeaValue::Bytes(None),
        DatabaseBackend::Sqlite => SeaValue::String(None),
        _ => SeaValue::String(None),
    }
}

pub(crate) fn opt_id_value(backend: DatabaseBackend, id: Option<Id>) -> SeaValue {
    match id {
        Some(id) => id_value(backend, id),
        None => none_id_value(backend),
    }
}

fn bytes_to_id(bytes: Vec<u8>) -> Option<Id> {
    if bytes.len() == 16 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes);
        Some(Id::from_bytes(buf))
    } else {
        None
    }
}

pub(crate) fn read_id(row: &QueryResult, column: impl sea_query::Iden) -> SysdbResult<Id> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<String>("", &name) {
        return Id::from_uuid_str(&value);
    }
    if let Ok(value) = row.try_get::<Uuid>("", &name) {
        return Ok(Id::from_bytes(*value.as_bytes()));
    }
    if let Ok(value) = row.try_get::<Vec<u8>>("", &name) {
        return bytes_to_id(value).ok_or_else(|| SysdbError::storage("invalid id length"));
    }
    Err(SysdbError::storage("unsupported id format"))
}

pub(crate) fn read_opt_id(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> SysdbResult<Option<Id>> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<Option<String>>("", &name) {
        return value.map(|value| Id::from_uuid_str(&value)).transpose();
    }
    if let Ok(value) = row.try_get::<Option<Uuid>>("", &name) {
        return Ok(value.map(|value| Id::from_bytes(*value.as_bytes())));
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>>("", &name) {
        return Ok(value.and_then(bytes_to_id));
    }
    Ok(None)
}

pub(crate) fn read_timestamp(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> SysdbResult<Timestamp> {
    let value: i64 = row.try_get("", &col_name(column))?;
    Ok(Timestamp::from_micros(value))
}

pub(crate) fn read_opt_timestamp(
    row: &QueryResult,
    column: impl sea_query::Iden,
) -> SysdbResult<Option<Timestamp>> {
    let value: Option<i64> = row.try_get("", &col_name(column))?;
    Ok(value.map(Timestamp::from_micros))
}

pub(crate) fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

/// Columns of a typed key/value metadata row, in `str, int, float, bool` order.
pub(crate) fn metadata_columns(value: &MetadataValue) -> [SeaValue; 4] {
    let mut columns = [
        SeaValue::String(None),
        SeaValue::BigInt(None),
        SeaValue::Double(None),
        SeaValue::Bool(None),
    ];
    match value {
        MetadataValue::Str(value) => columns[0] = SeaValue::String(Some(value.clone())),
        MetadataValue::Int(value) => columns[1] = SeaValue::BigInt(Some(*value)),
        MetadataValue::Float(value) => columns[2] = SeaValue::Double(Some(*value)),
        MetadataValue::Bool(value) => columns[3] = SeaValue::Bool(Some(*value)),
    }
    columns
}

pub(crate) fn read_metadata_value(
    row: &QueryResult,
    str_col: impl sea_query::Iden,
    int_col: impl sea_query::Iden,
    float_col: impl sea_query::Iden,
    bool_col: impl sea_query::Iden,
) -> SysdbResult<MetadataValue> {
    let str_value: Option<String> = row.try_get("", &col_name(str_col))?;
    if let Some(value) = str_value {
        return Ok(MetadataValue::Str(value));
    }
    let int_value: Option<i64> = row.try_get("", &col_name(int_col))?;
    if let Some(value) = int_value {
        return Ok(MetadataValue::Int(value));
    }
    let float_value: Option<f64> = row.try_get("", &col_name(float_col))?;
    if let Some(value) = float_value {
        return Ok(MetadataValue::Float(value));
    }
    let bool_value: Option<bool> = row.try_get("", &col_name(bool_col))?;
    bool_value
        .map(MetadataValue::Bool)
        .ok_or_else(|| SysdbError::storage("metadata row has no value"))
}

/// Name given to a soft-deleted row so the live name can be reused at once.
pub(crate) fn deleted_marker_name(name: &str, id: Id) -> String {
    format!("_deleted_{name}_{id}")
}

/// Applies `limit`/`offset`. Backends reject an offset without a limit, so an
/// offset alone gets the largest limit every backend accepts.
pub(crate) fn paginate(select: &mut SelectStatement, limit: Option<u64>, offset: u64) {
    match limit {
        Some(limit) => {
            select.limit(limit);
        }
        None if offset > 0 => {
            select.limit(i64::MAX as u64);
        }
        None => {}
    }
    if offset > 0 {
        select.offset(offset);
    }
}

pub(crate) fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> SysdbResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    exec_rows(conn, stmt).await?;
    Ok(())
}

/// Executes a write and reports how many rows its predicate matched.
pub(crate) async fn exec_rows<C, S>(conn: &C, stmt: &S) -> SysdbResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn query_all<C, S>(conn: &C, stmt: &S) -> SysdbResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> SysdbResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use sea_orm::DatabaseBackend;
    use sea_orm::sea_query::{Expr, ExprTrait, Query, Value as SeaValue};

    use super::{build_stmt, deleted_marker_name, id_value, metadata_columns, paginate};
    use crate::db::Collections;
    use sysdb_core::{Id, MetadataValue};

    #[test]
    fn ids_bind_per_backend() {
        let id = Id::new();
        assert!(matches!(id_value(DatabaseBackend::Postgres, id), SeaValue::Uuid(Some(_))));
        assert!(matches!(id_value(DatabaseBackend::MySql, id), SeaValue::Bytes(Some(_))));
        assert!(matches!(id_value(DatabaseBackend::Sqlite, id), SeaValue::String(Some(_))));
    }

    #[test]
    fn metadata_value_fills_one_column() {
        let columns = metadata_columns(&MetadataValue::Int(7));
        assert!(matches!(columns[0], SeaValue::String(None)));
        assert!(matches!(columns[1], SeaValue::BigInt(Some(7))));
        assert!(matches!(columns[2], SeaValue::Double(None)));
        assert!(matches!(columns[3], SeaValue::Bool(None)));
    }

    #[test]
    fn deleted_marker_embeds_id() {
        let id = Id::new();
        let marker = deleted_marker_name("events", id);
        assert!(marker.starts_with("_deleted_events_"));
        assert!(marker.ends_with(&id.to_uuid_string()));
    }

    #[test]
    fn offset_without_limit_gets_a_limit() {
        let mut select = Query::select().column(Collections::Id).from(Collections::Table).to_owned();
        paginate(&mut select, None, 5);
        let (sql, _) = build_stmt(DatabaseBackend::Sqlite, &select);
        assert!(sql.contains("LIMIT"));
        assert!(sql.contains("OFFSET"));
    }

    #[test]
    fn cas_predicate_renders_for_sqlite() {
        let update = Query::update()
            .table(Collections::Table)
            .values([(Collections::Version, 2i64.into())])
            .and_where(Expr::col(Collections::Version).eq(1i64))
            .and_where(Expr::col(Collections::LogPosition).lte(10i64))
            .to_owned();
        let (sql, _) = build_stmt(DatabaseBackend::Sqlite, &update);
        assert!(sql.starts_with("UPDATE \"collections\""));
        assert!(sql.contains("\"version\" = ?"));
        assert!(sql.contains("\"log_position\" <= ?"));
    }
}
