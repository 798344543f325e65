use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum Tenants {
    Table,
    Id,
    ResourceName,
    LastCompactionTime,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum Databases {
    Table,
    Id,
    Name,
    TenantId,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum Collections {
    Table,
    Id,
    Name,
    Tenant,
    DatabaseId,
    ConfigurationJson,
    SchemaJson,
    Dimension,
    LogPosition,
    Version,
    VersionFileName,
    RootCollectionId,
    LineageFileName,
    TotalRecordsPostCompaction,
    SizeBytesPostCompaction,
    LastCompactionTimeSecs,
    NumVersions,
    OldestVersionTs,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum CollectionMetadata {
    Table,
    CollectionId,
    Key,
    StrValue,
    IntValue,
    FloatValue,
    BoolValue,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum Segments {
    Table,
    Id,
    CollectionId,
    SegmentType,
    Scope,
    FilePaths,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum SegmentMetadata {
    Table,
    SegmentId,
    Key,
    StrValue,
    IntValue,
    FloatValue,
    BoolValue,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum Functions {
    Table,
    Id,
    Name,
    IsIncremental,
    ReturnType,
    CreatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum AttachedFunctions {
    Table,
    Id,
    Name,
    FunctionId,
    Tenant,
    DatabaseId,
    InputCollectionId,
    OutputCollectionId,
    OutputCollectionName,
    Params,
    CompletionOffset,
    MinRecordsForInvocation,
    CurrentAttempts,
    NextRun,
    LastRun,
    NextNonce,
    LowestLiveNonce,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}
