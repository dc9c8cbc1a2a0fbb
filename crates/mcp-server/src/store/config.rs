use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: Some(PathBuf::from("data/redshift-cot.db")),
            connection_string: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// In-memory SQLite, used by tests and throwaway local runs.
    pub fn in_memory() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: Some(PathBuf::from(":memory:")),
            connection_string: None,
            max_connections: 1,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.db_type {
            DatabaseType::Sqlite => {
                if self.sqlite_path.is_none() {
                    return Err("SQLite path is required for SQLite database type".to_string());
                }
            }
            DatabaseType::Postgres => {
                if self.connection_string.is_none() {
                    return Err("DATABASE_URL must be set when using PostgreSQL".to_string());
                }
            }
        }
        if self.max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than zero".to_string());
        }
        Ok(())
    }
}
