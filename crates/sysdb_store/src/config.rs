use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sysdb_core::{SysdbError, SysdbResult};

const DEFAULT_CONFIG_NAME: &str = "sysdb.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    pub cleanup_batch_size: Option<usize>,
    pub database_deletion_batch_size: Option<usize>,
}

impl GcConfig {
    pub fn with_defaults() -> Self {
        Self {
            cleanup_batch_size: Some(100),
            database_deletion_batch_size: Some(100),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SysdbConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub gc: Option<GcConfig>,
}

impl SysdbConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            gc: Some(GcConfig::with_defaults()),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> SysdbResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| SysdbError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| SysdbError::storage(format!("read config: {err}")))?;
            let config: SysdbConfig =
                serde_json::from_str(&raw).map_err(|err| SysdbError::invalid(err.to_string()))?;
            return Ok(config);
        }
        let default = SysdbConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| SysdbError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| SysdbError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> SysdbResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| "sysdb.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(SysdbError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> SysdbResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
        }
    }
}
