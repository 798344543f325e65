use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    AdvanceResult, AttachedFunction, AttachedFunctionId, Collection, CollectionId,
    CollectionToGc, CollectionWithMetadata, Database, DatabaseId, Function, FunctionId, Metadata,
    Nonce, PartialAttachedFunction, ScheduleEntry, Segment, SegmentFilePaths, SegmentId,
    SegmentScope, SysdbResult, Tenant, Timestamp,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateTenantInput {
    pub id: String,
    pub resource_name: Option<String>,
}

#[async_trait]
pub trait TenantApi {
    async fn create_tenant(&self, input: CreateTenantInput) -> SysdbResult<Tenant>;
    async fn get_tenant(&self, id: &str) -> SysdbResult<Tenant>;
    async fn list_tenants(&self, limit: Option<u64>, offset: u64) -> SysdbResult<Vec<Tenant>>;
    async fn set_tenant_resource_name(&self, id: &str, resource_name: &str) -> SysdbResult<()>;
    async fn update_tenant_last_compaction_time(
        &self,
        id: &str,
        last_compaction_time_secs: i64,
    ) -> SysdbResult<()>;
    async fn get_tenants_last_compaction_time(
        &self,
        ids: &[String],
    ) -> SysdbResult<Vec<(String, i64)>>;
    async fn soft_delete_tenant(&self, id: &str) -> SysdbResult<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateDatabaseInput {
    pub id: Option<DatabaseId>,
    pub name: String,
    pub tenant: String,
}

#[async_trait]
pub trait DatabaseApi {
    async fn create_database(&self, input: CreateDatabaseInput) -> SysdbResult<Database>;
    async fn get_database(&self, tenant: &str, name: &str) -> SysdbResult<Database>;
    async fn get_database_by_id(&self, id: DatabaseId) -> SysdbResult<Database>;
    async fn list_databases(
        &self,
        tenant: &str,
        limit: Option<u64>,
        offset: u64,
    ) -> SysdbResult<Vec<Database>>;
    async fn soft_delete_database(&self, tenant: &str, name: &str) -> SysdbResult<()>;
    /// Hard-deletes soft-deleted databases last updated before `cutoff` that no
    /// collection row references. Returns the number of databases removed.
    async fn finish_database_deletion(&self, cutoff: Timestamp) -> SysdbResult<u64>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateSegmentInput {
    pub id: Option<SegmentId>,
    pub segment_type: String,
    pub scope: SegmentScope,
    pub file_paths: SegmentFilePaths,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetSegmentsInput {
    pub collection_id: Option<CollectionId>,
    pub id: Option<SegmentId>,
    pub segment_type: Option<String>,
    pub scope: Option<SegmentScope>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushSegmentCompaction {
    pub segment_id: SegmentId,
    pub file_paths: SegmentFilePaths,
}

#[async_trait]
pub trait SegmentApi {
    async fn get_segments(&self, input: GetSegmentsInput) -> SysdbResult<Vec<Segment>>;
    async fn update_segment_metadata(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
        metadata: Metadata,
    ) -> SysdbResult<()>;
    async fn update_segment_file_paths(
        &self,
        collection_id: CollectionId,
        segments: Vec<FlushSegmentCompaction>,
    ) -> SysdbResult<()>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateCollectionInput {
    pub id: Option<CollectionId>,
    pub name: String,
    pub tenant: String,
    pub database_name: String,
    pub configuration_json: Option<String>,
    pub schema_json: Option<String>,
    pub dimension: Option<i32>,
    pub metadata: Metadata,
    pub segments: Vec<CreateSegmentInput>,
    pub get_or_create: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateCollectionResult {
    pub collection: CollectionWithMetadata,
    pub segments: Vec<Segment>,
    pub created: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ListCollectionsInput {
    pub tenant: String,
    pub database_name: Option<String>,
    pub name: Option<String>,
    pub limit: Option<u64>,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateVersionAndLogInput {
    pub collection_id: CollectionId,
    pub log_position: i64,
    pub current_version: i64,
    pub current_version_file_name: Option<String>,
    pub new_version: i64,
    pub new_version_file_name: String,
    pub total_records_post_compaction: i64,
    pub size_bytes_post_compaction: i64,
    pub last_compaction_time_secs: i64,
    pub num_versions: Option<i64>,
    pub oldest_version_ts: Option<Timestamp>,
    pub schema_json: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListCollectionsToGcInput {
    pub cutoff: Timestamp,
    pub min_versions: i64,
    pub limit: Option<u64>,
    pub tenant: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCollectionInput {
    pub id: CollectionId,
    pub name: Option<String>,
    pub configuration_json: Option<String>,
    pub dimension: Option<i32>,
    pub metadata: Option<Metadata>,
    pub reset_metadata: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForkCollectionInput {
    pub source_collection_id: CollectionId,
    pub target_collection_id: Option<CollectionId>,
    pub target_name: String,
    pub version_file_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushCompactionInput {
    pub tenant: String,
    pub collection_id: CollectionId,
    pub log_position: i64,
    pub current_version: i64,
    pub segments: Vec<FlushSegmentCompaction>,
    pub total_records_post_compaction: i64,
    pub size_bytes_post_compaction: i64,
    pub schema_json: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlushCompactionResult {
    pub collection_id: CollectionId,
    pub version: i64,
    pub last_compaction_time_secs: i64,
}

#[async_trait]
pub trait CollectionApi {
    async fn get_collection(&self, id: CollectionId) -> SysdbResult<Collection>;
    async fn get_collection_with_metadata(
        &self,
        id: CollectionId,
    ) -> SysdbResult<CollectionWithMetadata>;
    async fn list_collections(&self, input: ListCollectionsInput) -> SysdbResult<Vec<Collection>>;
    async fn list_collections_with_metadata(
        &self,
        input: ListCollectionsInput,
    ) -> SysdbResult<Vec<CollectionWithMetadata>>;
    async fn count_collections(&self, tenant: &str, database_name: Option<&str>)
    -> SysdbResult<u64>;
    async fn get_collection_size(&self, id: CollectionId) -> SysdbResult<i64>;
    /// Compare-and-swap advance keyed on the caller's view of `version` and
    /// `version_file_name`. Returns the new version.
    async fn update_version_and_log(&self, input: UpdateVersionAndLogInput) -> SysdbResult<i64>;
    /// Row-locked advance that classifies stale callers before bumping the
    /// version by exactly one. Returns the new version.
    async fn update_log_position_and_version(
        &self,
        id: CollectionId,
        log_position: i64,
        current_version: i64,
    ) -> SysdbResult<i64>;
    async fn update_lineage_file_name(
        &self,
        id: CollectionId,
        current_lineage_file_name: Option<&str>,
        new_lineage_file_name: &str,
    ) -> SysdbResult<()>;
    async fn soft_delete_collection(&self, id: CollectionId) -> SysdbResult<()>;
    async fn list_soft_deleted_collections(
        &self,
        cutoff: Timestamp,
        limit: Option<u64>,
    ) -> SysdbResult<Vec<Collection>>;
    async fn hard_delete_collection(&self, id: CollectionId) -> SysdbResult<()>;
    async fn list_collections_to_gc(
        &self,
        input: ListCollectionsToGcInput,
    ) -> SysdbResult<Vec<CollectionToGc>>;
}

#[async_trait]
pub trait FunctionApi {
    async fn get_function_by_name(&self, name: &str) -> SysdbResult<Function>;
    async fn get_function_by_id(&self, id: FunctionId) -> SysdbResult<Function>;
    async fn list_functions(&self) -> SysdbResult<Vec<Function>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateAttachedFunctionInput {
    pub id: Option<AttachedFunctionId>,
    pub name: String,
    pub function_id: FunctionId,
    pub tenant: String,
    pub database_id: DatabaseId,
    pub input_collection_id: CollectionId,
    pub output_collection_name: String,
    pub params: Option<String>,
    pub min_records_for_invocation: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachFunctionInput {
    pub name: String,
    pub function_name: String,
    pub input_collection_id: CollectionId,
    pub output_collection_name: String,
    pub params: Option<String>,
    pub min_records_for_invocation: i64,
}

#[async_trait]
pub trait AttachedFunctionApi {
    /// First create phase: the row exists but is not ready until
    /// `finish_attached_function_creation` runs.
    async fn insert_attached_function(
        &self,
        input: CreateAttachedFunctionInput,
    ) -> SysdbResult<AttachedFunction>;
    async fn set_output_collection(
        &self,
        id: AttachedFunctionId,
        output_collection_id: CollectionId,
    ) -> SysdbResult<()>;
    async fn finish_attached_function_creation(&self, id: AttachedFunctionId) -> SysdbResult<()>;
    async fn get_attached_function_by_name(
        &self,
        input_collection_id: CollectionId,
        name: &str,
    ) -> SysdbResult<AttachedFunction>;
    async fn get_attached_function_by_id(
        &self,
        id: AttachedFunctionId,
    ) -> SysdbResult<AttachedFunction>;
    async fn list_attached_functions(
        &self,
        input_collection_id: CollectionId,
    ) -> SysdbResult<Vec<AttachedFunction>>;
    async fn advance_attached_function(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
        completion_offset: i64,
        next_run_delay: Duration,
    ) -> SysdbResult<AdvanceResult>;
    async fn update_completion_offset(
        &self,
        id: AttachedFunctionId,
        run_nonce: Nonce,
        completion_offset: i64,
    ) -> SysdbResult<()>;
    async fn finish_attached_function(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
    ) -> SysdbResult<()>;
    async fn record_failed_attempt(
        &self,
        id: AttachedFunctionId,
        expected_next_nonce: Nonce,
        retry_delay: Duration,
    ) -> SysdbResult<i32>;
    async fn soft_delete_attached_function(
        &self,
        input_collection_id: CollectionId,
        name: &str,
    ) -> SysdbResult<()>;
    async fn soft_delete_attached_function_by_id(&self, id: AttachedFunctionId)
    -> SysdbResult<()>;
    async fn cleanup_expired_partial_attached_functions(
        &self,
        max_age: Duration,
    ) -> SysdbResult<Vec<PartialAttachedFunction>>;
    async fn get_attached_functions_to_gc(
        &self,
        cutoff: Timestamp,
        limit: Option<u64>,
    ) -> SysdbResult<Vec<AttachedFunction>>;
    /// Returns whether a row was removed; a row that stopped being eligible
    /// since it was listed is left alone.
    async fn hard_delete_attached_function(
        &self,
        id: AttachedFunctionId,
        cutoff: Timestamp,
    ) -> SysdbResult<bool>;
    async fn peek_schedule_by_collection_id(
        &self,
        collection_ids: &[CollectionId],
    ) -> SysdbResult<Vec<ScheduleEntry>>;
    async fn get_min_completion_offset_for_collection(
        &self,
        collection_id: CollectionId,
    ) -> SysdbResult<Option<i64>>;
}
