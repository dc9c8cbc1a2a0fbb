use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Pool, Postgres, Row,
};
use tracing::{debug, error, info};

use crate::{
    store::{Plan, SessionStore},
    Error, Result,
};

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        info!("Connecting to PostgreSQL database");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(connection_string)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }
}

fn plan_from_row(row: &PgRow) -> Result<Plan> {
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
impl SessionStore for PostgresStore {
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
            "INSERT INTO plan_sessions (session_id, to_do_list, created_at) VALUES ($1, $2, $3)",
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
            "SELECT session_id, to_do_list, created_at FROM plan_sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(plan_from_row).transpose()
    }
}
