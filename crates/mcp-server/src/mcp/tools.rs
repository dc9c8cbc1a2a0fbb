//! Tool registry: input schemas, descriptions and dispatch for every tool
//! the server exposes.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::generation::FragmentStream;
use crate::metrics::{record_tool_call, record_tool_failure};
use crate::monitor::{clamp_hours, render_points, MetricsSource};
use crate::warehouse::{schema_tables_sql, table_ddl_sql, Warehouse};
use crate::workflow::PlanWorkflow;

pub const PLAN_TASK: &str = "plan_task";
pub const CHECK_LIST: &str = "check_list";
pub const COT_THINKING: &str = "redshift_cot_thinking";
pub const EXECUTE_SQL: &str = "execute_sql";
pub const GET_SCHEMAS: &str = "get_schemas";
pub const GET_TABLE_DDL: &str = "get_table_ddl";
pub const GET_CPU_USAGE: &str = "get_cpu_usage";
pub const GET_CONNECTION_COUNT: &str = "get_database_connection_count";
pub const GET_CLOUDWATCH_METRICS: &str = "get_cloudwatch_metrics";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IssuesArgs {
    /// Specific description of the Redshift problems
    pub issues: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckListArgs {
    /// Session id returned by plan_task
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlArgs {
    /// The SQL to execute
    pub sql: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SchemaArgs {
    /// The Redshift schema
    pub schema: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TableDdlArgs {
    /// The Redshift schema name
    pub schema: String,
    /// The Redshift table name
    pub table: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClusterArgs {
    /// The Redshift cluster identifier (defaults to the configured cluster)
    #[serde(default)]
    pub cluster_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloudWatchArgs {
    /// The Redshift cluster identifier (defaults to the configured cluster)
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// CloudWatch metric name in the AWS/Redshift namespace, e.g. PercentageDiskSpaceUsed
    pub metric_name: String,
    /// How many past hours to return (default 1, at most 24)
    #[serde(default)]
    pub hours: Option<u32>,
}

/// Entry of the `tools/list` result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn definition<T: JsonSchema>(name: &'static str, description: &'static str) -> ToolDefinition {
    let mut input_schema = serde_json::to_value(schema_for!(T)).unwrap_or_default();
    if let Some(object) = input_schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        definition::<IssuesArgs>(
            PLAN_TASK,
            "Plan remediation for Redshift issues using the knowledge base. Returns a JSON object \
             with a sessionId and a to-do list. Execute every step, then call check_list with the \
             sessionId to verify nothing was missed.",
        ),
        definition::<CheckListArgs>(
            CHECK_LIST,
            "Return the to-do list stored for a plan_task session so completed work can be checked \
             against it.",
        ),
        definition::<IssuesArgs>(
            COT_THINKING,
            "Think through Redshift issues against the knowledge base and stream the analysis. \
             Nothing is stored.",
        ),
        definition::<SqlArgs>(EXECUTE_SQL, "Execute a SQL query on the Redshift cluster."),
        definition::<SchemaArgs>(GET_SCHEMAS, "Get all tables in a schema of the Redshift database."),
        definition::<TableDdlArgs>(GET_TABLE_DDL, "Get the DDL of a table in the Redshift database."),
        definition::<ClusterArgs>(
            GET_CPU_USAGE,
            "Get the past hour's average CPU utilization per minute for the cluster, oldest first.",
        ),
        definition::<ClusterArgs>(
            GET_CONNECTION_COUNT,
            "Get the past hour's average database connection count per minute for the cluster, \
             oldest first.",
        ),
        definition::<CloudWatchArgs>(
            GET_CLOUDWATCH_METRICS,
            "Get per-minute averages of any AWS/Redshift CloudWatch metric for the cluster, oldest \
             first.",
        ),
    ]
}

/// What a tool call produced.
pub enum ToolOutcome {
    Text { text: String, is_error: bool },
    Stream(FragmentStream),
}

impl ToolOutcome {
    fn ok(text: String) -> Self {
        ToolOutcome::Text {
            text,
            is_error: false,
        }
    }

    fn error(text: String) -> Self {
        ToolOutcome::Text {
            text,
            is_error: true,
        }
    }
}

impl From<Result<String, String>> for ToolOutcome {
    fn from(result: Result<String, String>) -> Self {
        match result {
            Ok(text) => ToolOutcome::ok(text),
            Err(text) => ToolOutcome::error(text),
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|e| format!("Invalid arguments for {}: {}", tool, e))
}

/// Tool implementations over the shared collaborators.
pub struct ToolRegistry {
    workflow: Arc<PlanWorkflow>,
    warehouse: Arc<dyn Warehouse>,
    monitor: Arc<dyn MetricsSource>,
    default_cluster: String,
}

impl ToolRegistry {
    pub fn new(
        workflow: Arc<PlanWorkflow>,
        warehouse: Arc<dyn Warehouse>,
        monitor: Arc<dyn MetricsSource>,
        default_cluster: impl Into<String>,
    ) -> Self {
        Self {
            workflow,
            warehouse,
            monitor,
            default_cluster: default_cluster.into(),
        }
    }

    pub fn is_known(name: &str) -> bool {
        definitions().iter().any(|d| d.name == name)
    }

    pub async fn call(&self, name: &str, arguments: Value) -> ToolOutcome {
        if !Self::is_known(name) {
            warn!("Unknown tool requested: {}", name);
            return ToolOutcome::error(format!("Unknown tool: {}", name));
        }

        record_tool_call(name);
        info!(tool = name, "Tool call");

        let outcome = match name {
            COT_THINKING => match parse_args::<IssuesArgs>(name, arguments) {
                Ok(args) => ToolOutcome::Stream(self.workflow.think_stream(&args.issues).await),
                Err(e) => ToolOutcome::error(e),
            },
            PLAN_TASK => self.plan_task(arguments).await.into(),
            CHECK_LIST => self.check_list(arguments).await.into(),
            EXECUTE_SQL => self.execute_sql(arguments).await.into(),
            GET_SCHEMAS => self.get_schemas(arguments).await.into(),
            GET_TABLE_DDL => self.get_table_ddl(arguments).await.into(),
            GET_CPU_USAGE => self
                .cluster_metric(name, arguments, "CPUUtilization", "average_cpu_utilization")
                .await
                .into(),
            GET_CONNECTION_COUNT => self
                .cluster_metric(
                    name,
                    arguments,
                    "DatabaseConnections",
                    "average_database_connections",
                )
                .await
                .into(),
            _ => self.cloudwatch_metrics(arguments).await.into(),
        };

        if let ToolOutcome::Text { is_error: true, text } = &outcome {
            record_tool_failure(name);
            warn!(tool = name, "Tool returned a diagnostic: {}", text);
        }
        outcome
    }

    async fn plan_task(&self, arguments: Value) -> Result<String, String> {
        let args: IssuesArgs = parse_args(PLAN_TASK, arguments)?;
        let outcome = self
            .workflow
            .plan_task(&args.issues)
            .await
            .map_err(|e| e.diagnostic())?;
        outcome.to_json().map_err(|e| e.to_string())
    }

    async fn check_list(&self, arguments: Value) -> Result<String, String> {
        let args: CheckListArgs = parse_args(CHECK_LIST, arguments)?;
        let plan = self
            .workflow
            .check_list(&args.session_id)
            .await
            .map_err(|e| e.diagnostic())?;
        plan.to_json().map_err(|e| e.to_string())
    }

    async fn run_sql(&self, sql: &str) -> Result<String, String> {
        self.warehouse
            .execute(sql)
            .await
            .map(|output| output.to_csv())
            .map_err(|e| e.diagnostic())
    }

    async fn execute_sql(&self, arguments: Value) -> Result<String, String> {
        let args: SqlArgs = parse_args(EXECUTE_SQL, arguments)?;
        if args.sql.trim().is_empty() {
            return Err("sql must not be empty".to_string());
        }
        self.run_sql(&args.sql).await
    }

    async fn get_schemas(&self, arguments: Value) -> Result<String, String> {
        let args: SchemaArgs = parse_args(GET_SCHEMAS, arguments)?;
        let sql = schema_tables_sql(&args.schema).map_err(|e| e.diagnostic())?;
        self.run_sql(&sql).await
    }

    async fn get_table_ddl(&self, arguments: Value) -> Result<String, String> {
        let args: TableDdlArgs = parse_args(GET_TABLE_DDL, arguments)?;
        let sql = table_ddl_sql(&args.schema, &args.table).map_err(|e| e.diagnostic())?;
        self.run_sql(&sql).await
    }

    fn cluster<'a>(&'a self, requested: &'a Option<String>) -> &'a str {
        requested
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.default_cluster)
    }

    async fn series(&self, cluster: &str, metric: &str, hours: u32, field: &str) -> Result<String, String> {
        self.monitor
            .average_series(cluster, metric, hours)
            .await
            .map(|points| render_points(&points, field))
            .map_err(|e| e.diagnostic())
    }

    async fn cluster_metric(
        &self,
        tool: &str,
        arguments: Value,
        metric: &str,
        field: &str,
    ) -> Result<String, String> {
        let args: ClusterArgs = parse_args(tool, arguments)?;
        self.series(self.cluster(&args.cluster_name), metric, 1, field).await
    }

    async fn cloudwatch_metrics(&self, arguments: Value) -> Result<String, String> {
        let args: CloudWatchArgs = parse_args(GET_CLOUDWATCH_METRICS, arguments)?;
        self.series(
            self.cluster(&args.cluster_name),
            &args.metric_name,
            clamp_hours(args.hours),
            "value",
        )
        .await
    }
}
