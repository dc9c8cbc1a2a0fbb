pub mod config;
pub mod generation;
pub mod knowledge;
pub mod mcp;
pub mod metrics;
pub mod monitor;
pub mod server;
pub mod store;
pub mod warehouse;
pub mod workflow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Knowledge fetch error: {0}")]
    Knowledge(#[from] knowledge::FetchError),
    #[error("Generation error: {0}")]
    Generation(#[from] generation::GenerationError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_component_errors_with_context() {
        let err: Error = knowledge::FetchError::NotFound {
            bucket: "kb".to_string(),
            key: "rules.md".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("Knowledge fetch error:"));
        assert!(err.to_string().contains("s3://kb/rules.md"));
    }
}
