use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

use crate::db::{AttachedFunctions, Functions};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        manager
            .create_table(
                Table::create()
                    .table(AttachedFunctions::Table)
                    .if_not_exists()
                    .col(id_col(backend, AttachedFunctions::Id, false).primary_key())
                    .col(ColumnDef::new(AttachedFunctions::Name).string().not_null())
                    .col(id_col(backend, AttachedFunctions::FunctionId, false))
                    .col(ColumnDef::new(AttachedFunctions::Tenant).string().not_null())
                    .col(id_col(backend, AttachedFunctions::DatabaseId, false))
                    .col(id_col(backend, AttachedFunctions::InputCollectionId, false))
                    .col(id_col(backend, AttachedFunctions::OutputCollectionId, true))
                    .col(
                        ColumnDef::new(AttachedFunctions::OutputCollectionName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AttachedFunctions::Params).text().null())
                    .col(
                        ColumnDef::new(AttachedFunctions::CompletionOffset)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AttachedFunctions::MinRecordsForInvocation)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AttachedFunctions::CurrentAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AttachedFunctions::NextRun)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AttachedFunctions::LastRun).big_integer().null())
                    .col(id_col(backend, AttachedFunctions::NextNonce, false))
                    .col(id_col(backend, AttachedFunctions::LowestLiveNonce, true))
                    .col(
                        ColumnDef::new(AttachedFunctions::IsDeleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AttachedFunctions::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AttachedFunctions::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_attached_functions_function")
                            .from(AttachedFunctions::Table, AttachedFunctions::FunctionId)
                            .to(Functions::Table, Functions::Id),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("attached_functions_input_name_uniq")
                    .table(AttachedFunctions::Table)
                    .col(AttachedFunctions::InputCollectionId)
                    .col(AttachedFunctions::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("attached_functions_gc_idx")
                    .table(AttachedFunctions::Table)
                    .col(AttachedFunctions::IsDeleted)
                    .col(AttachedFunctions::UpdatedAt)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(AttachedFunctions::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
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
