use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    series_selector, validate_cluster, validate_metric, MetricPoint, MetricsSource, MonitorError,
    MAX_HOURS, STEP_SECONDS,
};

/// Reads exported CloudWatch series through the Prometheus HTTP API.
pub struct PrometheusMonitor {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
    timeout: Duration,
}

impl PrometheusMonitor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            auth_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query_range(
        &self,
        query: &str,
        start: &str,
        end: &str,
        step: &str,
    ) -> Result<PrometheusResponse, MonitorError> {
        let url = format!("{}/api/v1/query_range", self.base_url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("query", query), ("start", start), ("end", end), ("step", step)])
            .timeout(self.timeout);

        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(MonitorError::Query(format!("{}: {}", status, error_text)));
        }

        let result: PrometheusResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))?;

        if result.status != "success" {
            return Err(MonitorError::Query(
                result.error.unwrap_or_else(|| format!("status {}", result.status)),
            ));
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    #[serde(default)]
    data: Option<PrometheusData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

fn to_points(response: PrometheusResponse) -> Result<Vec<MetricPoint>, MonitorError> {
    let mut points = Vec::new();
    for series in response.data.map(|d| d.result).unwrap_or_default() {
        for (timestamp, raw) in series.values {
            let value: f64 = raw
                .parse()
                .map_err(|_| MonitorError::Decode(format!("non-numeric sample {:?}", raw)))?;
            let timestamp = Utc
                .timestamp_millis_opt((timestamp * 1000.0).round() as i64)
                .single()
                .ok_or_else(|| MonitorError::Decode(format!("bad timestamp {}", timestamp)))?;
            points.push(MetricPoint { timestamp, value });
        }
    }
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

#[async_trait]
impl MetricsSource for PrometheusMonitor {
    async fn average_series(
        &self,
        cluster: &str,
        metric: &str,
        hours: u32,
    ) -> Result<Vec<MetricPoint>, MonitorError> {
        let cluster = validate_cluster(cluster)?;
        let metric = validate_metric(metric)?;
        let hours = hours.clamp(1, MAX_HOURS);

        let end = Utc::now();
        let start = end - ChronoDuration::hours(i64::from(hours));
        let query = series_selector(cluster, metric);
        debug!("Range query {} over the last {}h", query, hours);

        let response = self
            .query_range(
                &query,
                &start.timestamp().to_string(),
                &end.timestamp().to_string(),
                &format!("{}s", STEP_SECONDS),
            )
            .await
            .map_err(|e| {
                warn!("Metrics query for {} failed: {}", cluster, e);
                e
            })?;

        to_points(response)
    }
}
