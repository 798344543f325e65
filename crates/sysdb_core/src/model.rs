use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    AttachedFunctionId, CollectionId, DatabaseId, FunctionId, Metadata, Nonce, SegmentId,
    SegmentScope, Timestamp,
};

pub const DEFAULT_TENANT: &str = "default_tenant";
pub const DEFAULT_DATABASE: &str = "default_database";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub resource_name: Option<String>,
    pub last_compaction_time_secs: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub id: DatabaseId,
    pub name: String,
    pub tenant: String,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub tenant: String,
    pub database_id: DatabaseId,
    pub configuration_json: Option<String>,
    pub schema_json: Option<String>,
    pub dimension: Option<i32>,
    pub log_position: i64,
    pub version: i64,
    pub version_file_name: Option<String>,
    pub root_collection_id: Option<CollectionId>,
    pub lineage_file_name: Option<String>,
    pub total_records_post_compaction: i64,
    pub size_bytes_post_compaction: i64,
    pub last_compaction_time_secs: i64,
    pub num_versions: i64,
    pub oldest_version_ts: Option<Timestamp>,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Collection {
    /// Key shared by every member of a fork tree.
    pub fn fork_tree_root(&self) -> CollectionId {
        self.root_collection_id.unwrap_or(self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionWithMetadata {
    pub collection: Collection,
    pub metadata: Metadata,
}

/// Root of a fork tree selected for garbage collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionToGc {
    pub id: CollectionId,
    pub name: String,
    pub tenant: String,
    pub version_file_name: Option<String>,
    pub lineage_file_name: Option<String>,
    pub num_versions: i64,
    pub is_deleted: bool,
}

pub type SegmentFilePaths = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub collection_id: CollectionId,
    pub segment_type: String,
    pub scope: SegmentScope,
    pub file_paths: SegmentFilePaths,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub is_incremental: bool,
    pub return_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachedFunction {
    pub id: AttachedFunctionId,
    pub name: String,
    pub function_id: FunctionId,
    pub tenant: String,
    pub database_id: DatabaseId,
    pub input_collection_id: CollectionId,
    pub output_collection_id: Option<CollectionId>,
    pub output_collection_name: String,
    pub params: Option<String>,
    pub completion_offset: i64,
    pub min_records_for_invocation: i64,
    pub current_attempts: i32,
    pub next_run: Timestamp,
    pub last_run: Option<Timestamp>,
    pub next_nonce: Nonce,
    pub lowest_live_nonce: Option<Nonce>,
    pub is_deleted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl AttachedFunction {
    pub fn is_ready(&self) -> bool {
        self.lowest_live_nonce.is_some()
    }

    /// A crash between advance and finish leaves the issued generation
    /// unverified; the next run must only recheck it.
    pub fn needs_verification(&self) -> bool {
        self.lowest_live_nonce
            .is_some_and(|lowest| lowest != self.next_nonce)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvanceResult {
    pub next_nonce: Nonce,
    pub completion_offset: i64,
    pub next_run: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialAttachedFunction {
    pub id: AttachedFunctionId,
    pub output_collection_id: Option<CollectionId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub collection_id: CollectionId,
    pub attached_function_id: AttachedFunctionId,
    pub next_nonce: Nonce,
    pub lowest_live_nonce: Nonce,
    pub completion_offset: i64,
    pub min_records_for_invocation: i64,
    pub next_run: Timestamp,
}
