mod config;
mod models;
mod sqlite;
mod postgres;
mod factory;

pub use config::{DatabaseConfig, DatabaseType};
pub use models::*;
pub use sqlite::SqliteStore;
pub use postgres::PostgresStore;
pub use factory::create_store;

use async_trait::async_trait;

/// Append-only persistence for plan sessions.
///
/// Each session id is written at most once; there is no update or delete
/// path, so readers never race a writer on the same key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    // Initialize database schema
    async fn init(&self) -> crate::Result<()>;

    /// Persist a freshly issued plan. Writing an id that already exists is an
    /// error, never an overwrite.
    async fn put(&self, plan: &Plan) -> crate::Result<()>;

    /// Point lookup. A missing session is `Ok(None)`, not an error.
    async fn get(&self, session_id: &str) -> crate::Result<Option<Plan>>;
}
