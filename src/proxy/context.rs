use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request routing context. Created when the request enters the
/// pipeline, consumed exactly once when the response is on its way out.
pub struct RequestContext {
    pub method: String,
    pub path: String,
    version: String,
    reason: Option<String>,
    start: Instant,
}

impl RequestContext {
    pub fn new(method: String, path: String, version: String) -> Self {
        Self {
            method,
            path,
            version,
            reason: None,
            start: Instant::now(),
        }
    }

    /// Attach the human-readable routing reason. Later calls win; the final
    /// decision is the one recorded.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Emit the request measurement: a count grouped by
    /// `{version, target, reason}` and a latency distribution grouped by
    /// `{version, target}`.
    pub fn record(&self, target: &str, status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status);

        metrics::counter!(
            "canary_router_request_count",
            "version" => self.version.clone(),
            "target" => target.to_owned(),
            "reason" => self.reason().to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "canary_router_request_latency",
            "version" => self.version.clone(),
            "target" => target.to_owned(),
        )
        .record(self.elapsed_ms());

        tracing::info!(
            method = %self.method,
            path = %self.path,
            status = %status_str,
            target = %target,
            reason = %self.reason(),
            latency_ms = %format!("{:.1}", self.elapsed_ms()),
            "access"
        );
    }
}
