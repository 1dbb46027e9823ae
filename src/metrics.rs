//! Prometheus counters on the default registry.

use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};
use std::sync::LazyLock;

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("static metric definition is valid");
    if let Err(e) = prometheus::register(Box::new(counter.clone())) {
        tracing::warn!("Failed to register metric {}: {}", name, e);
    }
    counter
}

static FORWARDS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "tenantgate_forwards_total",
        "Messages forwarded to tenant endpoints",
        &["tenant", "outcome"],
    )
});

static TOKEN_REFRESHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "tenantgate_token_refreshes_total",
        "OAuth client-credentials token requests",
        &["tenant", "outcome"],
    )
});

static CONNECTIONS_ACCEPTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    counter_vec(
        "tenantgate_connections_accepted_total",
        "Inbound TCP connections accepted",
        &["tenant"],
    )
});

fn outcome(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

pub fn record_forward(tenant: &str, ok: bool) {
    FORWARDS.with_label_values(&[tenant, outcome(ok)]).inc();
}

pub fn record_token_refresh(tenant: &str, ok: bool) {
    TOKEN_REFRESHES
        .with_label_values(&[tenant, outcome(ok)])
        .inc();
}

pub fn record_connection_accepted(tenant: &str) {
    CONNECTIONS_ACCEPTED.with_label_values(&[tenant]).inc();
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return "Error encoding metrics".to_string();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            "Error converting metrics to UTF-8".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_output_contains_counters() {
        record_forward("metrics-test", true);
        record_token_refresh("metrics-test", false);
        record_connection_accepted("metrics-test");

        let text = render();
        assert!(text.contains("tenantgate_forwards_total"));
        assert!(text.contains("tenantgate_token_refreshes_total"));
        assert!(text.contains("tenantgate_connections_accepted_total"));
    }
}
