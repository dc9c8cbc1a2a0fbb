use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Column, Either, Executor, Row};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{QueryOutput, Warehouse, WarehouseError};
use crate::config::WarehouseConfig;

/// Redshift over the PostgreSQL wire protocol.
///
/// Statements run through the simple query protocol, so every value arrives
/// in text format and multi-statement batches are accepted.
pub struct RedshiftClient {
    pool: PgPool,
}

impl RedshiftClient {
    /// Build the pool without connecting; the first query opens a connection.
    pub fn new(config: &WarehouseConfig) -> Self {
        info!(
            "Configuring Redshift client for {}:{}/{}",
            config.host, config.port, config.database
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(options);

        Self { pool }
    }

    /// Column names of a statement that produced no rows. Multi-statement
    /// batches cannot be described and yield no columns.
    async fn result_columns(&self, sql: &str) -> Vec<String> {
        match self.pool.describe(sql).await {
            Ok(described) => described
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                debug!("No result columns described: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Warehouse for RedshiftClient {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, WarehouseError> {
        debug!("Executing SQL: {}", sql);

        let mut output = QueryOutput::default();
        let mut results = self.pool.fetch_many(sql);

        while let Some(item) = results.try_next().await.map_err(|e| {
            error!("Query failed: {}", e);
            WarehouseError::from(e)
        })? {
            match item {
                Either::Left(done) => output.rows_affected += done.rows_affected(),
                Either::Right(row) => {
                    if output.columns.is_empty() {
                        output.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    let cells = (0..row.len())
                        .map(|i| row.try_get_unchecked::<Option<String>, _>(i))
                        .collect::<Result<Vec<_>, _>>()?;
                    output.rows.push(cells);
                }
            }
        }

        if output.columns.is_empty() && output.rows.is_empty() {
            output.columns = self.result_columns(sql).await;
        }

        debug!("Query returned {} rows", output.rows.len());
        Ok(output)
    }
}
