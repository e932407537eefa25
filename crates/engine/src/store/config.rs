use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `:memory:` keeps everything in process
    pub sqlite_path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/autoflow.db"),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: PathBuf::from(IN_MEMORY),
            max_connections: 1,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.sqlite_path.as_os_str() == IN_MEMORY
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sqlite_path.as_os_str().is_empty() {
            return Err("SQLite path is required".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        Ok(())
    }
}
