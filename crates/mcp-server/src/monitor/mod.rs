//! Monitor Client
//!
//! Metrics pass-through for the monitored cluster. Series are read from a
//! Prometheus-compatible API that exports the cluster's CloudWatch metrics
//! (`aws_redshift_<metric>_average{cluster_identifier="..."}`).

mod promql;

pub use promql::PrometheusMonitor;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

/// Range queries never look further back than this.
pub const MAX_HOURS: u32 = 24;
/// One datapoint per minute.
pub const STEP_SECONDS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("invalid cluster name {0:?}")]
    InvalidCluster(String),
    #[error("invalid metric name {0:?}")]
    InvalidMetric(String),
    #[error("metrics query failed: {0}")]
    Query(String),
    #[error("metrics endpoint unreachable: {0}")]
    Transport(String),
    #[error("unexpected metrics response: {0}")]
    Decode(String),
}

impl MonitorError {
    pub fn diagnostic(&self) -> String {
        format!("Error retrieving metrics: {}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Per-minute averages of `metric` for `cluster` over the last `hours`,
    /// oldest first.
    async fn average_series(
        &self,
        cluster: &str,
        metric: &str,
        hours: u32,
    ) -> Result<Vec<MetricPoint>, MonitorError>;
}

lazy_static! {
    static ref CLUSTER: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9-]{0,62}$").expect("cluster pattern is valid");
    static ref METRIC: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,127}$").expect("metric pattern is valid");
}

pub fn validate_cluster(name: &str) -> Result<&str, MonitorError> {
    let name = name.trim();
    if CLUSTER.is_match(name) {
        Ok(name)
    } else {
        Err(MonitorError::InvalidCluster(name.to_string()))
    }
}

pub fn validate_metric(name: &str) -> Result<&str, MonitorError> {
    let name = name.trim();
    if METRIC.is_match(name) {
        Ok(name)
    } else {
        Err(MonitorError::InvalidMetric(name.to_string()))
    }
}

/// `hours` defaults to 1 and is capped to [`MAX_HOURS`].
pub fn clamp_hours(hours: Option<u32>) -> u32 {
    hours.unwrap_or(1).clamp(1, MAX_HOURS)
}

/// CloudWatch metric name to exporter snake case: an underscore goes only
/// between a lowercase letter or digit and the uppercase letter after it.
pub fn snake_case(metric: &str) -> String {
    let mut out = String::with_capacity(metric.len() + 4);
    let mut prev: Option<char> = None;
    for c in metric.chars() {
        if c.is_ascii_uppercase() {
            if let Some(p) = prev {
                if p.is_ascii_lowercase() || p.is_ascii_digit() {
                    out.push('_');
                }
            }
        }
        out.push(c.to_ascii_lowercase());
        prev = Some(c);
    }
    out
}

/// Exported series selector for one cluster metric.
pub fn series_selector(cluster: &str, metric: &str) -> String {
    format!(
        "aws_redshift_{}_average{{cluster_identifier=\"{}\"}}",
        snake_case(metric),
        cluster
    )
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Render points as a JSON list of `{"timestamp": ..., <field>: ...}`.
pub fn render_points(points: &[MetricPoint], field: &str) -> String {
    let list: Vec<Value> = points
        .iter()
        .map(|p| {
            let mut entry = serde_json::Map::new();
            entry.insert(
                "timestamp".to_string(),
                json!(p.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            entry.insert(field.to_string(), json!(round2(p.value)));
            Value::Object(entry)
        })
        .collect();
    Value::Array(list).to_string()
}
