use std::path::{Path, PathBuf};

use crate::{MetaDomain, SysdbConfig, SysdbResult};

const DEFAULT_DB_NAME: &str = "sysdb.sqlite";

pub fn load_or_init_config(base: &Path) -> SysdbResult<SysdbConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    SysdbConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_meta_domain(base: &Path) -> SysdbResult<MetaDomain> {
    let config = load_or_init_config(base)?;
    MetaDomain::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use super::{default_sqlite_path, load_or_init_config, open_meta_domain};
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_meta_domain_with_default_config() {
        let dir = tempdir().expect("tempdir");
        let base = dir.path();
        let config = load_or_init_config(base).expect("config");
        assert_eq!(config.backend_name(), "sqlite");
        assert!(base.join("sysdb.json").exists());
        let meta = open_meta_domain(base).await.expect("open meta domain");
        let path = default_sqlite_path(base);
        assert!(path.exists());
        let _ = meta;
    }
}
