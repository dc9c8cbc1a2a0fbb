mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::Config,
    generation::{create_backend, GroundedGenerationEngine},
    knowledge::{create_knowledge_source, KnowledgeLocation},
    mcp::{McpServer, ToolRegistry},
    monitor::PrometheusMonitor,
    store::create_store,
    warehouse::RedshiftClient,
    workflow::PlanWorkflow,
    Result,
};

/// Wire every collaborator from configuration. Shared by both transports.
pub async fn build_mcp_server(config: &Config) -> Result<Arc<McpServer>> {
    let knowledge = create_knowledge_source(&config.knowledge)?;
    let backend = create_backend(&config.llm)?;
    info!("Using {} generation backend, model {}", backend.name(), config.llm.model);

    let store = create_store(&config.database).await?;
    store.init().await?;

    let workflow = PlanWorkflow::new(
        knowledge,
        GroundedGenerationEngine::new(backend),
        store,
        KnowledgeLocation::new(&config.knowledge.bucket, &config.knowledge.key),
        config.knowledge.max_chars,
    );

    let warehouse = RedshiftClient::new(&config.warehouse);

    let mut monitor = PrometheusMonitor::new(&config.monitor.url)
        .with_timeout(Duration::from_secs(config.monitor.timeout_seconds));
    if let Some(token) = &config.monitor.token {
        monitor = monitor.with_auth_token(token.clone());
    }

    let tools = ToolRegistry::new(
        Arc::new(workflow),
        Arc::new(warehouse),
        Arc::new(monitor),
        config.monitor.cluster.clone(),
    );
    Ok(Arc::new(McpServer::new(tools)))
}

pub struct Server {
    mcp: Arc<McpServer>,
}

impl Server {
    pub fn new(mcp: Arc<McpServer>) -> Self {
        Self { mcp }
    }

    pub fn build_router(self) -> Router {
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(routes::health))
            .route("/metrics", get(routes::metrics))
            .route("/mcp", post(routes::mcp))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn start(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, self.build_router()).await?;
        Ok(())
    }
}
