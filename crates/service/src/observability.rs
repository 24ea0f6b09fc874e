use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec, TextEncoder};

// Prometheus metrics (default registry)
pub static SERVICE_UP: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "hub_service_up",
        "1 when the service answered its last reachability probe",
        &["service"]
    )
    .expect("register hub_service_up")
});

pub static SERVICE_STARTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hub_service_starts_total",
        "Managed service starts by kind",
        &["kind"]
    )
    .expect("register hub_service_starts_total")
});

pub static REACHABILITY_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "hub_service_reachability_failures_total",
        "Services that could not be reached after all tries",
        &["service"]
    )
    .expect("register hub_service_reachability_failures_total")
});

pub fn set_service_up(service: &str, up: bool) {
    SERVICE_UP.with_label_values(&[service]).set(i64::from(up));
}

/// Text exposition of the default registry.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_shows_up_in_exposition() {
        set_service_up("metrics-test-svc", true);
        let text = encode_metrics().expect("encode");
        assert!(text.contains("hub_service_up{service=\"metrics-test-svc\"} 1"));
    }
}
