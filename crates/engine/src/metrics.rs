use lazy_static::lazy_static;
use prometheus::{register_int_counter_with_registry, Encoder, IntCounter, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref EXECUTIONS_STARTED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_executions_started_total",
        "Total number of workflow executions created.",
        REGISTRY
    )
    .expect("register autoflow_executions_started_total");
    pub static ref EXECUTIONS_COMPLETED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_executions_completed_total",
        "Total number of workflow executions that reached COMPLETED.",
        REGISTRY
    )
    .expect("register autoflow_executions_completed_total");
    pub static ref EXECUTIONS_FAILED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_executions_failed_total",
        "Total number of workflow executions that reached FAILED.",
        REGISTRY
    )
    .expect("register autoflow_executions_failed_total");
    pub static ref EXECUTIONS_CANCELED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_executions_canceled_total",
        "Total number of workflow executions canceled.",
        REGISTRY
    )
    .expect("register autoflow_executions_canceled_total");
    pub static ref STEPS_EXECUTED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_steps_executed_total",
        "Total number of workflow steps interpreted.",
        REGISTRY
    )
    .expect("register autoflow_steps_executed_total");
    pub static ref DUPLICATES_SKIPPED_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_dispatch_duplicates_skipped_total",
        "Total number of launches skipped because the subject already had an active execution.",
        REGISTRY
    )
    .expect("register autoflow_dispatch_duplicates_skipped_total");
    pub static ref WEBHOOK_CALLS_TOTAL: IntCounter = register_int_counter_with_registry!(
        "autoflow_webhook_calls_total",
        "Total number of outbound webhook calls.",
        REGISTRY
    )
    .expect("register autoflow_webhook_calls_total");
}

// Function to gather metrics for exposition
pub fn gather_metrics() -> crate::Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::Error::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| crate::Error::Internal(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gathered_text_names_counters() {
        EXECUTIONS_STARTED_TOTAL.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("autoflow_executions_started_total"));
    }
}
