use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref TOOL_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("redshift_cot_tool_calls_total", "Total number of tool invocations."),
        &["tool"]
    )
    .expect("tool call counter definition is valid");
    pub static ref TOOL_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "redshift_cot_tool_failures_total",
            "Total number of tool invocations that returned a diagnostic."
        ),
        &["tool"]
    )
    .expect("tool failure counter definition is valid");
    pub static ref SESSIONS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "redshift_cot_sessions_created_total",
        "Total number of plan sessions durably stored."
    )
    .expect("session counter definition is valid");
    pub static ref SESSIONS_UNPERSISTED_TOTAL: IntCounter = IntCounter::new(
        "redshift_cot_sessions_unpersisted_total",
        "Total number of plans returned without a durable session."
    )
    .expect("session counter definition is valid");
    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        for collector in [
            Box::new(TOOL_CALLS_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(TOOL_FAILURES_TOTAL.clone()),
            Box::new(SESSIONS_CREATED_TOTAL.clone()),
            Box::new(SESSIONS_UNPERSISTED_TOTAL.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }
        registry
    };
}

/// Force registration so `/metrics` lists every series from the first scrape.
pub fn register_metrics() {
    lazy_static::initialize(&REGISTRY);
}

pub fn record_tool_call(tool: &str) {
    TOOL_CALLS_TOTAL.with_label_values(&[tool]).inc();
}

pub fn record_tool_failure(tool: &str) {
    TOOL_FAILURES_TOTAL.with_label_values(&[tool]).inc();
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| crate::Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::Error::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_tool_counters() {
        register_metrics();
        record_tool_call("metrics_test_tool");
        record_tool_failure("metrics_test_tool");

        let text = gather_metrics().unwrap();
        assert!(text.contains("redshift_cot_tool_calls_total{tool=\"metrics_test_tool\"}"));
        assert!(text.contains("redshift_cot_tool_failures_total{tool=\"metrics_test_tool\"}"));
        assert!(text.contains("redshift_cot_sessions_created_total"));
    }
}
