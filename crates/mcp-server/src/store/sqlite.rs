use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::{
    store::{Plan, SessionStore},
    Error, Result,
};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(database_path: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to SQLite database: {}", database_path);

        let in_memory = database_path.contains(":memory:");
        if !in_memory {
            if let Some(parent) = std::path::Path::new(database_path.trim_start_matches("sqlite://"))
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
            {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_path)
            .map_err(|e| {
                error!("Invalid SQLite path {}: {}", database_path, e);
                Error::Sqlx(e)
            })?
            .create_if_missing(true);

        // Every connection to :memory: opens its own database, so the pool
        // must never hold more than one.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to connect to SQLite: {}", e);
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }
}

fn plan_from_row(row: &SqliteRow) -> Result<Plan> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Plan {
        session_id: row.try_get::<String, _>("session_id")?.parse()?,
        to_do_list: row.try_get("to_do_list")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| Error::Internal(format!("Invalid created_at {:?}: {}", created_at, e)))?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to run migrations: {}", e);
                Error::Migrate(e)
            })?;

        Ok(())
    }

    async fn put(&self, plan: &Plan) -> Result<()> {
        debug!("Saving plan session: {}", plan.session_id);

        sqlx::query(
            "INSERT INTO plan_sessions (session_id, to_do_list, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(plan.session_id.to_string())
        .bind(&plan.to_do_list)
        .bind(plan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Plan>> {
        debug!("Getting plan session: {}", session_id);

        let row = sqlx::query(
            "SELECT session_id, to_do_list, created_at FROM plan_sessions WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(plan_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::new(":memory:", 1).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_then_get_returns_identical_plan() {
        let store = memory_store().await;
        let plan = Plan::new("1. Run VACUUM on fact tables\n2. ANALYZE afterwards");

        store.put(&plan).await.unwrap();
        let fetched = store.get(&plan.session_id.to_string()).await.unwrap();

        assert_eq!(fetched, Some(plan));
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let store = memory_store().await;
        assert_eq!(store.get("not-a-session").await.unwrap(), None);
        assert_eq!(
            store.get("00000000-0000-0000-0000-000000000000").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn duplicate_put_does_not_overwrite() {
        let store = memory_store().await;
        let plan = Plan::new("original");
        store.put(&plan).await.unwrap();

        let mut rewrite = plan.clone();
        rewrite.to_do_list = "rewritten".to_string();
        assert!(store.put(&rewrite).await.is_err());

        let fetched = store.get(&plan.session_id.to_string()).await.unwrap().unwrap();
        assert_eq!(fetched.to_do_list, "original");
    }

    #[tokio::test]
    async fn reads_are_repeatable() {
        let store = memory_store().await;
        let plan = Plan::new("check WLM queue configuration");
        store.put(&plan).await.unwrap();

        let id = plan.session_id.to_string();
        let first = store.get(&id).await.unwrap();
        let second = store.get(&id).await.unwrap();
        assert_eq!(first, second);
    }
}
