use std::sync::Arc;

use crate::store::{DatabaseConfig, SqliteStore};

/// Open the configured database. The schema is not migrated until `init`.
pub async fn create_store(config: &DatabaseConfig) -> crate::Result<Arc<SqliteStore>> {
    config.validate().map_err(crate::Error::Config)?;

    if config.is_in_memory() {
        return Ok(Arc::new(SqliteStore::in_memory().await?));
    }

    if let Some(parent) = config.sqlite_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    Ok(Arc::new(SqliteStore::new(&config.sqlite_path, config.max_connections).await?))
}
