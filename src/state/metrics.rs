use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Metrics {
    registry: Registry,

    // Request metrics
    pub total_requests: IntCounter,
    pub failed_requests: IntCounter,
    pub request_duration: Histogram,

    // Dispatch metrics
    pub proxied_requests: IntCounter,
    pub local_requests: IntCounter,

    // Plugin metrics
    pub registered_plugins: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let total_requests = IntCounter::new(
            "automation_server_requests_total",
            "Total number of HTTP requests",
        )?;
        let failed_requests = IntCounter::new(
            "automation_server_requests_failed",
            "Total number of requests answered with an error",
        )?;
        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "automation_server_request_duration_seconds",
            "Request duration in seconds",
        ))?;

        let proxied_requests = IntCounter::new(
            "automation_server_proxied_requests_total",
            "Requests forwarded upstream by the driver",
        )?;
        let local_requests = IntCounter::new(
            "automation_server_local_requests_total",
            "Requests handled locally through the plugin chain",
        )?;

        let registered_plugins = IntGauge::new(
            "automation_server_registered_plugins",
            "Number of registered plugins",
        )?;

        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(failed_requests.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(proxied_requests.clone()))?;
        registry.register(Box::new(local_requests.clone()))?;
        registry.register(Box::new(registered_plugins.clone()))?;

        Ok(Self {
            registry,
            total_requests,
            failed_requests,
            request_duration,
            proxied_requests,
            local_requests,
            registered_plugins,
        })
    }

    pub fn record_request(&self) {
        self.total_requests.inc();
    }

    pub fn record_failed_request(&self) {
        self.failed_requests.inc();
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.request_duration.observe(duration.as_secs_f64());
    }

    pub fn record_dispatch(&self, proxied: bool) {
        if proxied {
            self.proxied_requests.inc();
        } else {
            self.local_requests.inc();
        }
    }

    pub fn set_registered_plugins(&self, count: usize) {
        self.registered_plugins.set(count as i64);
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.gather_metrics(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.record_request();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self) {
        self.metrics.record_request_duration(self.start.elapsed());
    }

    pub fn fail(self) {
        self.metrics.record_request_duration(self.start.elapsed());
        self.metrics.record_failed_request();
    }
}
