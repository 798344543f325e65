mod attached_function;
mod collection;
pub mod config;
mod database;
pub mod datastore;
mod db;
mod function;
mod meta_domain;
pub mod migration;
mod segment;
mod sql;
mod tenant;

pub use sysdb_core::*;

pub use attached_function::AttachedFunctionStore;
pub use collection::CollectionStore;
pub use config::{DatabaseConfig, GcConfig, PoolConfig, SysdbConfig};
pub use database::DatabaseStore;
pub use datastore::{default_sqlite_path, load_or_init_config, open_meta_domain};
pub use function::FunctionStore;
pub use meta_domain::MetaDomain;
pub use segment::SegmentStore;
pub use tenant::TenantStore;
