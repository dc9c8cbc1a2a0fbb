use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::generation::LLMConfig;
use crate::store::{DatabaseConfig, DatabaseType};

/// Default character budget for the knowledge document inside a prompt.
pub const DEFAULT_KNOWLEDGE_MAX_CHARS: usize = 200_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    Http,
    Local,
}

impl Default for KnowledgeBackend {
    fn default() -> Self {
        KnowledgeBackend::Http
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub knowledge: KnowledgeConfig,
    pub llm: LLMConfig,
    pub database: DatabaseConfig,
    pub warehouse: WarehouseConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub backend: KnowledgeBackend,
    pub bucket: String,
    pub key: String,
    /// Base URL of the S3-compatible endpoint (http backend).
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Directory holding `<bucket>/<key>` files (local backend).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    pub timeout_seconds: u64,
    pub max_chars: usize,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub max_connections: u32,
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Cluster identifier the monitoring tools default to.
    pub cluster: String,
    /// Prometheus-compatible query endpoint exporting the cluster's CloudWatch series.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present).
    pub fn load() -> crate::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Missing required
    /// variables produce `Error::Config` so startup aborts before serving.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| {
                crate::Error::Config(format!("{} must be set", name))
            })
        };
        let parsed = |name: &str, default: u64| -> crate::Result<u64> {
            match var(name) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    crate::Error::Config(format!("{} must be a positive integer, got {:?}", name, raw))
                }),
                None => Ok(default),
            }
        };
        let parsed_u32 = |name: &str, default: u32| -> crate::Result<u32> {
            let value = parsed(name, u64::from(default))?;
            u32::try_from(value)
                .map_err(|_| crate::Error::Config(format!("{} out of range: {}", name, value)))
        };

        let backend = match var("KNOWLEDGE_BACKEND")
            .unwrap_or_else(|| "http".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => KnowledgeBackend::Local,
            "http" | "s3" => KnowledgeBackend::Http,
            other => {
                return Err(crate::Error::Config(format!(
                    "Unsupported KNOWLEDGE_BACKEND: {}",
                    other
                )))
            }
        };

        let knowledge = KnowledgeConfig {
            backend,
            bucket: required("BUCKET")?,
            key: required("KEY")?,
            endpoint: var("OBJECT_STORE_ENDPOINT")
                .unwrap_or_else(|| "https://s3.amazonaws.com".to_string()),
            token: var("OBJECT_STORE_TOKEN"),
            root: var("KNOWLEDGE_ROOT").map(PathBuf::from),
            timeout_seconds: parsed("OBJECT_STORE_TIMEOUT_SECONDS", 30)?,
            max_chars: parsed("KNOWLEDGE_MAX_CHARS", DEFAULT_KNOWLEDGE_MAX_CHARS as u64)? as usize,
        };

        let llm = LLMConfig {
            provider: var("LLM_PROVIDER").unwrap_or_else(|| "anthropic".to_string()),
            endpoint: var("LLM_ENDPOINT"),
            model: var("LLM_MODEL").unwrap_or_else(|| "claude-3-7-sonnet".to_string()),
            api_key: var("LLM_API_KEY"),
        };

        let database = DatabaseConfig {
            db_type: match var("DATABASE_TYPE")
                .unwrap_or_else(|| "sqlite".to_string())
                .to_lowercase()
                .as_str()
            {
                "sqlite" => DatabaseType::Sqlite,
                "postgres" => DatabaseType::Postgres,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unsupported DATABASE_TYPE: {}",
                        other
                    )))
                }
            },
            sqlite_path: var("SQLITE_PATH")
                .map(PathBuf::from)
                .or_else(|| Some(PathBuf::from("data/redshift-cot.db"))),
            connection_string: var("DATABASE_URL"),
            max_connections: parsed_u32("DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let port = parsed("REDSHIFT_PORT", 5439)?;
        let warehouse = WarehouseConfig {
            host: required("REDSHIFT_HOST")?,
            port: u16::try_from(port).map_err(|_| {
                crate::Error::Config(format!("REDSHIFT_PORT out of range: {}", port))
            })?,
            database: required("REDSHIFT_DATABASE")?,
            user: required("REDSHIFT_USER")?,
            password: required("REDSHIFT_PASSWORD")?,
            max_connections: parsed_u32("REDSHIFT_MAX_CONNECTIONS", 4)?,
        };

        let monitor = MonitorConfig {
            cluster: required("REDSHIFT_CLUSTER")?,
            url: var("MONITOR_URL").unwrap_or_else(|| "http://localhost:9090".to_string()),
            token: var("MONITOR_TOKEN"),
            timeout_seconds: parsed("MONITOR_TIMEOUT_SECONDS", 30)?,
        };

        let config = Config {
            server: ServerConfig {
                addr: var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            },
            knowledge,
            llm,
            database,
            warehouse,
            monitor,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.knowledge.backend == KnowledgeBackend::Local && self.knowledge.root.is_none() {
            return Err(crate::Error::Config(
                "KNOWLEDGE_ROOT must be set when KNOWLEDGE_BACKEND=local".to_string(),
            ));
        }
        let location = crate::knowledge::KnowledgeLocation::new(&self.knowledge.bucket, &self.knowledge.key);
        if location.has_dot_segments() {
            return Err(crate::Error::Config(format!(
                "KEY must not contain '.' or '..' segments: {:?}",
                self.knowledge.key
            )));
        }
        if self.knowledge.max_chars == 0 {
            return Err(crate::Error::Config(
                "KNOWLEDGE_MAX_CHARS must be greater than zero".to_string(),
            ));
        }

        self.database.validate().map_err(crate::Error::Config)?;

        if self.llm.api_key.is_none() && self.llm.provider != "mock" {
            tracing::warn!(
                "LLM_API_KEY is not set. The {} provider will fall back to its own environment variable.",
                self.llm.provider
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8000".to_string(),
            },
            knowledge: KnowledgeConfig {
                backend: KnowledgeBackend::Http,
                bucket: "redshift-knowledge".to_string(),
                key: "redshift-kb.md".to_string(),
                endpoint: "https://s3.amazonaws.com".to_string(),
                token: None,
                root: None,
                timeout_seconds: 30,
                max_chars: DEFAULT_KNOWLEDGE_MAX_CHARS,
            },
            llm: LLMConfig::default(),
            database: DatabaseConfig::default(),
            warehouse: WarehouseConfig {
                host: "localhost".to_string(),
                port: 5439,
                database: "dev".to_string(),
                user: "awsuser".to_string(),
                password: String::new(),
                max_connections: 4,
            },
            monitor: MonitorConfig {
                cluster: "redshift-cluster-1".to_string(),
                url: "http://localhost:9090".to_string(),
                token: None,
                timeout_seconds: 30,
            },
        }
    }
}
