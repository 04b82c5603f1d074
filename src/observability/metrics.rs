use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub service_requests_total: IntCounterVec,
    pub downstream_calls_total: IntCounterVec,
    pub downstream_latency_seconds: HistogramVec,
    pub alerts_failed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let service_requests_total = IntCounterVec::new(
            Opts::new(
                "service_requests_total",
                "Lifecycle operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )
        .expect("valid service_requests_total metric");

        let downstream_calls_total = IntCounterVec::new(
            Opts::new(
                "downstream_calls_total",
                "Calls to downstream services by service and outcome",
            ),
            &["service", "outcome"],
        )
        .expect("valid downstream_calls_total metric");

        let downstream_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "downstream_latency_seconds",
                "Latency of downstream service calls in seconds, retries included",
            ),
            &["service"],
        )
        .expect("valid downstream_latency_seconds metric");

        let alerts_failed_total =
            IntCounter::new("alerts_failed_total", "Notifications that could not be delivered")
                .expect("valid alerts_failed_total metric");

        registry
            .register(Box::new(service_requests_total.clone()))
            .expect("register service_requests_total");
        registry
            .register(Box::new(downstream_calls_total.clone()))
            .expect("register downstream_calls_total");
        registry
            .register(Box::new(downstream_latency_seconds.clone()))
            .expect("register downstream_latency_seconds");
        registry
            .register(Box::new(alerts_failed_total.clone()))
            .expect("register alerts_failed_total");

        Self {
            registry,
            service_requests_total,
            downstream_calls_total,
            downstream_latency_seconds,
            alerts_failed_total,
        }
    }

    pub fn record_operation<T, E>(&self, operation: &str, result: &Result<T, E>) {
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.service_requests_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
