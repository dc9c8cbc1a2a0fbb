use crate::store::{DatabaseConfig, DatabaseType, PostgresStore, SessionStore, SqliteStore};
use std::sync::Arc;

pub async fn create_store(config: &DatabaseConfig) -> crate::Result<Arc<dyn SessionStore>> {
    match config.db_type {
        DatabaseType::Sqlite => {
            let path = config.sqlite_path
                .as_ref()
                .ok_or_else(|| crate::Error::Config("SQLite path not configured".into()))?
                .to_str()
                .ok_or_else(|| crate::Error::Config("SQLite path is not valid UTF-8".into()))?;
            Ok(Arc::new(SqliteStore::new(path, config.max_connections).await?))
        },
        DatabaseType::Postgres => {
            let connection_string = config.connection_string
                .as_ref()
                .ok_or_else(|| crate::Error::Config("PostgreSQL connection string not configured".into()))?;
            Ok(Arc::new(PostgresStore::new(connection_string, config.max_connections).await?))
        },
    }
}
