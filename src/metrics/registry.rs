use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Latency distribution boundaries in milliseconds:
/// [>=0, >=25, >=50, >=75, >=100, >=200, >=400, >=600, >=800, >=1s, >=2s, >=4s, >=6s]
const LATENCY_BUCKETS_MS: &[f64] = &[
    0.0, 25.0, 50.0, 75.0, 100.0, 200.0, 400.0, 600.0, 800.0, 1000.0, 2000.0, 4000.0, 6000.0,
];

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thin handle around the process-global metrics recorder.
///
/// Metric definitions are process-wide: the first `Metrics::install()` wins
/// and later calls (tests build several routers per process) reuse the same
/// recorder. The `PrometheusHandle` is retained solely for rendering the
/// `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn install() -> Self {
        let handle = RECORDER.get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("canary_router_request_latency".to_string()),
                    LATENCY_BUCKETS_MS,
                )
                .expect("valid matcher")
                .install_recorder()
                .expect("failed to install metrics recorder");

            describe_counter!(
                "canary_router_request_count",
                Unit::Count,
                "The count of requests per target and reason"
            );
            describe_histogram!(
                "canary_router_request_latency",
                Unit::Milliseconds,
                "The latency distribution per request target"
            );

            handle
        });

        Self {
            handle: handle.clone(),
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
