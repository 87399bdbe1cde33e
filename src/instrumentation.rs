//! Instrument bundles handed to request middleware and HTTP clients.
//!
//! The metric bundles wrap instruments created on the service's instrument factory;
//! the span factories create `tracing` spans that the OpenTelemetry layer exports.

use std::fmt;
use std::time::{Duration, Instant};

use opentelemetry::metrics::{Counter, Histogram, Meter, ObservableGauge};
use opentelemetry::KeyValue;
use tracing::Span;

use crate::config::TelemetryConfig;
use crate::correlation::CorrelationId;

const HTTP_SERVER_DURATION: &str = "http.server.request.duration";
const HTTP_SERVER_SLOW_REQUESTS: &str = "http.server.slow_requests";
const HTTP_CLIENT_DURATION: &str = "http.client.request.duration";
const PROCESS_UPTIME: &str = "process.uptime";
const PROCESS_CPU_COUNT: &str = "process.cpu.count";

/// An optional instrumentation sub-module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instrumentation {
    Runtime,
    HttpClient,
    IncomingRequests,
}

impl fmt::Display for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrumentation::Runtime => f.write_str("runtime"),
            Instrumentation::HttpClient => f.write_str("http-client"),
            Instrumentation::IncomingRequests => f.write_str("incoming-requests"),
        }
    }
}

/// Every bundle the orchestrator attached. Absent entries were not enabled.
#[derive(Debug, Default)]
pub struct Instruments {
    pub runtime: Option<RuntimeInstruments>,
    pub http_client: Option<HttpClientInstruments>,
    pub http_server: Option<HttpServerInstruments>,
    pub client_spans: Option<HttpClientSpans>,
    pub server_spans: Option<HttpServerSpans>,
}

/// Process-level observable gauges. They report for as long as the meter provider lives.
pub struct RuntimeInstruments {
    _uptime: ObservableGauge<f64>,
    _cpu_count: ObservableGauge<u64>,
}

impl RuntimeInstruments {
    pub(crate) fn new(meter: &Meter, config: &TelemetryConfig) -> Self {
        let naming = &config.metric_naming;
        let started = Instant::now();

        let uptime = meter
            .f64_observable_gauge(naming.resolve(PROCESS_UPTIME, None))
            .with_unit("s")
            .with_description("Time since the telemetry pipeline started")
            .with_callback(move |observer| observer.observe(started.elapsed().as_secs_f64(), &[]))
            .build();

        let cpu_count = meter
            .u64_observable_gauge(naming.resolve(PROCESS_CPU_COUNT, None))
            .with_description("Logical CPUs available to the process")
            .with_callback(|observer| {
                let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
                observer.observe(u64::try_from(cpus).unwrap_or(u64::MAX), &[]);
            })
            .build();

        Self {
            _uptime: uptime,
            _cpu_count: cpu_count,
        }
    }
}

impl fmt::Debug for RuntimeInstruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInstruments").finish_non_exhaustive()
    }
}

/// Outgoing HTTP call instruments.
#[derive(Clone)]
pub struct HttpClientInstruments {
    duration: Histogram<f64>,
}

impl HttpClientInstruments {
    pub(crate) fn new(meter: &Meter, config: &TelemetryConfig) -> Self {
        let naming = &config.metric_naming;
        let duration = meter
            .f64_histogram(
                naming.resolve(HTTP_CLIENT_DURATION, naming.http_client_duration.as_ref()),
            )
            .with_unit("s")
            .with_description("Duration of outgoing HTTP requests")
            .with_boundaries(config.histogram_buckets.clone())
            .build();

        Self { duration }
    }

    pub fn record(&self, method: &str, server_address: &str, status: u16, elapsed: Duration) {
        self.duration.record(
            elapsed.as_secs_f64(),
            &[
                KeyValue::new("http.request.method", method.to_owned()),
                KeyValue::new("server.address", server_address.to_owned()),
                KeyValue::new("http.response.status_code", i64::from(status)),
            ],
        );
    }
}

impl fmt::Debug for HttpClientInstruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientInstruments").finish_non_exhaustive()
    }
}

/// Incoming request instruments, including slow-request accounting.
#[derive(Clone)]
pub struct HttpServerInstruments {
    duration: Histogram<f64>,
    slow_requests: Counter<u64>,
    slow_threshold: Duration,
}

impl HttpServerInstruments {
    pub(crate) fn new(meter: &Meter, config: &TelemetryConfig) -> Self {
        let naming = &config.metric_naming;
        let duration = meter
            .f64_histogram(
                naming.resolve(HTTP_SERVER_DURATION, naming.http_server_duration.as_ref()),
            )
            .with_unit("s")
            .with_description("Duration of incoming HTTP requests")
            .with_boundaries(config.histogram_buckets.clone())
            .build();
        let slow_requests = meter
            .u64_counter(naming.resolve(HTTP_SERVER_SLOW_REQUESTS, None))
            .with_description("Incoming requests at or above the slow-request threshold")
            .build();

        Self {
            duration,
            slow_requests,
            slow_threshold: config.slow_request_threshold(),
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed >= self.slow_threshold
    }

    /// Record one finished request. Returns whether it counted as slow.
    pub fn record(&self, method: &str, route: &str, status: u16, elapsed: Duration) -> bool {
        let attributes = [
            KeyValue::new("http.request.method", method.to_owned()),
            KeyValue::new("http.route", route.to_owned()),
            KeyValue::new("http.response.status_code", i64::from(status)),
        ];
        self.duration.record(elapsed.as_secs_f64(), &attributes);

        let slow = self.is_slow(elapsed);
        if slow {
            self.slow_requests.add(1, &attributes);
            tracing::warn!(
                method,
                route,
                status,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "slow request"
            );
        }
        slow
    }
}

impl fmt::Debug for HttpServerInstruments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerInstruments")
            .field("slow_threshold", &self.slow_threshold)
            .finish_non_exhaustive()
    }
}

/// Creates client-kind spans for outgoing HTTP calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientSpans;

impl HttpClientSpans {
    pub fn span(&self, method: &str, url: &str) -> Span {
        tracing::info_span!(
            "http.client.request",
            otel.kind = "client",
            otel.name = %method,
            http.request.method = %method,
            url.full = %url,
        )
    }
}

/// Creates server-kind spans for incoming requests, stamped with a correlation ID when
/// the correlation enricher is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpServerSpans {
    correlation: bool,
}

impl HttpServerSpans {
    pub(crate) fn new(correlation: bool) -> Self {
        Self { correlation }
    }

    /// Open a request span. A fresh correlation ID is generated when none is supplied.
    pub fn span(&self, method: &str, route: &str, correlation_id: Option<&CorrelationId>) -> Span {
        let span = tracing::info_span!(
            "http.server.request",
            otel.kind = "server",
            otel.name = %format!("{method} {route}"),
            http.request.method = %method,
            http.route = %route,
            correlation_id = tracing::field::Empty,
        );
        if self.correlation {
            let id = correlation_id.cloned().unwrap_or_default();
            span.record("correlation_id", id.as_str());
        }
        span
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    use super::*;

    fn meter() -> Meter {
        SdkMeterProvider::builder().build().meter("instrumentation-tests")
    }

    #[test]
    fn slow_requests_are_detected_at_threshold() {
        let config = TelemetryConfig::builder("svc")
            .slow_request_threshold(Duration::from_millis(250))
            .build();
        let server = HttpServerInstruments::new(&meter(), &config);

        assert_eq!(server.slow_threshold(), Duration::from_millis(250));
        assert!(!server.record("GET", "/orders", 200, Duration::from_millis(249)));
        assert!(server.record("GET", "/orders", 200, Duration::from_millis(250)));
        assert!(server.record("POST", "/orders", 500, Duration::from_secs(3)));
    }

    #[test]
    fn client_and_runtime_instruments_build_on_any_meter() {
        let config = TelemetryConfig::builder("svc").build();
        let meter = meter();

        let client = HttpClientInstruments::new(&meter, &config);
        client.record("GET", "inventory.internal", 404, Duration::from_millis(12));
        let _runtime = RuntimeInstruments::new(&meter, &config);
    }

    #[test]
    fn server_spans_carry_correlation_ids() {
        let spans = HttpServerSpans::new(true);
        let id = CorrelationId::from_string("req-7");

        // No subscriber is installed, so spans are disabled; creation must still be safe.
        let span = spans.span("GET", "/health", Some(&id));
        let _entered = span.enter();
        let _client = HttpClientSpans.span("GET", "http://inventory/items");
    }
}
