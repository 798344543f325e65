use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

use crate::db::*;
use crate::sql::{build_stmt, id_value};
use sysdb_core::{DEFAULT_DATABASE, DEFAULT_TENANT, Id, Timestamp};

const DEFAULT_DATABASE_ID: &str = "00000000-0000-0000-0000-000000000000";
const BUILTIN_FUNCTIONS: [(&str, &str, bool, &str); 2] = [
    ("00000000-0000-0000-0000-000000000001", "record_counter", true, "record"),
    ("00000000-0000-0000-0000-000000000002", "statistics", true, "record"),
];

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tenants::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Tenants::ResourceName).string().null())
                    .col(
                        ColumnDef::new(Tenants::LastCompactionTime)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Tenants::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Tenants::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Tenants::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Databases::Table)
                    .if_not_exists()
                    .col(id_col(backend, Databases::Id, false).primary_key())
                    .col(ColumnDef::new(Databases::Name).string().not_null())
                    .col(ColumnDef::new(Databases::TenantId).string().not_null())
                    .col(
                        ColumnDef::new(Databases::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Databases::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Databases::UpdatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Collections::Table)
                    .if_not_exists()
                    .col(id_col(backend, Collections::Id, false).primary_key())
                    .col(ColumnDef::new(Collections::Name).string().not_null())
                    .col(ColumnDef::new(Collections::Tenant).string().not_null())
                    .col(id_col(backend, Collections::DatabaseId, false))
                    .col(ColumnDef::new(Collections::ConfigurationJson).text().null())
                    .col(ColumnDef::new(Collections::SchemaJson).text().null())
                    .col(ColumnDef::new(Collections::Dimension).integer().null())
                    .col(counter_col(Collections::LogPosition))
                    .col(counter_col(Collections::Version))
                    .col(ColumnDef::new(Collections::VersionFileName).string().null())
                    .col(id_col(backend, Collections::RootCollectionId, true))
                    .col(ColumnDef::new(Collections::LineageFileName).string().null())
                    .col(counter_col(Collections::TotalRecordsPostCompaction))
                    .col(counter_col(Collections::SizeBytesPostCompaction))
                    .col(counter_col(Collections::LastCompactionTimeSecs))
                    .col(counter_col(Collections::NumVersions))
                    .col(
                        ColumnDef::new(Collections::OldestVersionTs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Collections::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Collections::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Collections::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CollectionMetadata::Table)
                    .if_not_exists()
                    .col(id_col(backend, CollectionMetadata::CollectionId, false))
                    .col(ColumnDef::new(CollectionMetadata::Key).string().not_null())
                    .col(ColumnDef::new(CollectionMetadata::StrValue).text().null())
                    .col(
                        ColumnDef::new(CollectionMetadata::IntValue)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(CollectionMetadata::FloatValue).double().null())
                    .col(ColumnDef::new(CollectionMetadata::BoolValue).boolean().null())
                    .col(
                        ColumnDef::new(CollectionMetadata::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CollectionMetadata::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_collection_metadata")
                            .col(CollectionMetadata::CollectionId)
                            .col(CollectionMetadata::Key),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collection_metadata_collection")
                            .from(CollectionMetadata::Table, CollectionMetadata::CollectionId)
                            .to(Collections::Table, Collections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Segments::Table)
                    .if_not_exists()
                    .col(id_col(backend, Segments::Id, false).primary_key())
                    .col(id_col(backend, Segments::CollectionId, false))
                    .col(ColumnDef::new(Segments::SegmentType).string().not_null())
                    .col(ColumnDef::new(Segments::Scope).string().not_null())
                    .col(ColumnDef::new(Segments::FilePaths).text().not_null())
                    .col(ColumnDef::new(Segments::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(Segments::UpdatedAt).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_segments_collection")
                            .from(Segments::Table, Segments::CollectionId)
                            .to(Collections::Table, Collections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SegmentMetadata::Table)
                    .if_not_exists()
                    .col(id_col(backend, SegmentMetadata::SegmentId, false))
                    .col(ColumnDef::new(SegmentMetadata::Key).string().not_null())
                    .col(ColumnDef::new(SegmentMetadata::StrValue).text().null())
                    .col(ColumnDef::new(SegmentMetadata::IntValue).big_integer().null())
                    .col(ColumnDef::new(SegmentMetadata::FloatValue).double().null())
                    .col(ColumnDef::new(SegmentMetadata::BoolValue).boolean().null())
                    .col(
                        ColumnDef::new(SegmentMetadata::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SegmentMetadata::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_segment_metadata")
                            .col(SegmentMetadata::SegmentId)
                            .col(SegmentMetadata::Key),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_segment_metadata_segment")
                            .from(SegmentMetadata::Table, SegmentMetadata::SegmentId)
                            .to(Segments::Table, Segments::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Functions::Table)
                    .if_not_exists()
                    .col(id_col(backend, Functions::Id, false).primary_key())
                    .col(ColumnDef::new(Functions::Name).string().not_null())
                    .col(ColumnDef::new(Functions::IsIncremental).boolean().not_null())
                    .col(ColumnDef::new(Functions::ReturnType).string().not_null())
                    .col(ColumnDef::new(Functions::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        create_indexes(manager).await?;
        seed_defaults(manager, backend).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SegmentMetadata::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Segments::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CollectionMetadata::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Collections::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Databases::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tenants::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Functions::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

async fn create_indexes(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_index(
            Index::create()
                .name("databases_name_tenant_uniq")
                .table(Databases::Table)
                .col(Databases::Name)
                .col(Databases::TenantId)
                .unique()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("collections_name_database_uniq")
                .table(Collections::Table)
                .col(Collections::Name)
                .col(Collections::DatabaseId)
                .unique()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("collections_database_created_idx")
                .table(Collections::Table)
                .col(Collections::DatabaseId)
                .col(Collections::CreatedAt)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("collections_root_idx")
                .table(Collections::Table)
                .col(Collections::RootCollectionId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("segments_collection_idx")
                .table(Segments::Table)
                .col(Segments::CollectionId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("functions_name_uniq")
                .table(Functions::Table)
                .col(Functions::Name)
                .unique()
                .to_owned(),
        )
        .await?;
    Ok(())
}

async fn seed_defaults(manager: &SchemaManager<'_>, backend: DatabaseBackend) -> Result<(), DbErr> {
    let now = Timestamp::now().as_micros();
    let default_database_id =
        Id::from_uuid_str(DEFAULT_DATABASE_ID).map_err(|err| DbErr::Custom(err.to_string()))?;

    let mut statements = vec![
        Query::insert()
            .into_table(Tenants::Table)
            .columns([
                Tenants::Id,
                Tenants::LastCompactionTime,
                Tenants::IsDeleted,
                Tenants::CreatedAt,
                Tenants::UpdatedAt,
            ])
            .values_panic([
                DEFAULT_TENANT.into(),
                0i64.into(),
                false.into(),
                now.into(),
                now.into(),
            ])
            .to_owned(),
        Query::insert()
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
                id_value(backend, default_database_id).into(),
                DEFAULT_DATABASE.into(),
                DEFAULT_TENANT.into(),
                false.into(),
                now.into(),
                now.into(),
            ])
            .to_owned(),
    ];
    for (id, name, is_incremental, return_type) in BUILTIN_FUNCTIONS {
        let function_id = Id::from_uuid_str(id).map_err(|err| DbErr::Custom(err.to_string()))?;
        statements.push(
            Query::insert()
                .into_table(Functions::Table)
                .columns([
                    Functions::Id,
                    Functions::Name,
                    Functions::IsIncremental,
                    Functions::ReturnType,
                    Functions::CreatedAt,
                ])
                .values_panic([
                    id_value(backend, function_id).into(),
                    name.into(),
                    is_incremental.into(),
                    return_type.into(),
                    now.into(),
                ])
                .to_owned(),
        );
    }

    for insert in statements {
        let (sql, values) = build_stmt(backend, &insert);
        manager
            .get_connection()
            .execute_raw(Statement::from_sql_and_values(backend, sql, values))
            .await?;
    }
    Ok(())
}

fn counter_col(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

fn id_col(backend: DatabaseBackend, col: impl IntoIden, nullable: bool) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Postgres => {
            col_def.uuid();
        }
        DatabaseBackend::MySql => {
            col_def.binary_len(16);
        }
        DatabaseBackend::Sqlite => {
            col_def.string_len(36);
        }
        _ => {
            col_def.string_len(36);
        }
    }
    if nullable {
        col_def.null();
    } else {
        col_def.not_null();
    }
    col_def.to_owned()
}
