use std::time::{Duration, Instant};

use raccoon_telemetry::{CorrelationId, Instruments, TelemetryConfig};
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let endpoint = std::env::args().nth(1);

    let mut builder = TelemetryConfig::builder("raccoon-telemetry-demo")
        .environment("demo")
        .labels([("team", "raccoons")])
        .slow_request_threshold(Duration::from_millis(100))
        .minimum_log_level("debug");

    if let Some(ref url) = endpoint {
        builder = builder.collector_endpoint(url);
    }

    let config = builder.build().with_env_overrides();
    let telemetry = raccoon_telemetry::setup_telemetry(config)?;

    for warning in telemetry.warnings() {
        tracing::warn!(warning, "Configuration warning");
    }
    if let Some(scrape) = telemetry.scrape_endpoint() {
        tracing::info!(port = scrape.port, path = %scrape.path, "Scrape endpoint ready to mount");
    }

    tracing::info!("Demo application started");

    let instruments = telemetry.instruments();
    handle_request(instruments, "GET", "/users/{id}", Duration::from_millis(50)).await;
    handle_request(instruments, "POST", "/orders", Duration::from_millis(140)).await;

    for probe in telemetry.probes() {
        let report = probe.evaluate();
        tracing::info!(probe = probe.name(), status = %report.status, "{}", report.description);
    }

    tracing::info!("Demo application finished");

    Ok(())
}

async fn handle_request(instruments: &Instruments, method: &str, route: &str, work: Duration) {
    let correlation_id = CorrelationId::new();
    let span = instruments
        .server_spans
        .map(|spans| spans.span(method, route, Some(&correlation_id)))
        .unwrap_or_else(tracing::Span::none);

    async {
        let started = Instant::now();
        tracing::info!(%correlation_id, "Handling request");
        call_inventory(instruments).await;
        tokio::time::sleep(work).await;

        if let Some(server) = &instruments.http_server {
            if server.record(method, route, 200, started.elapsed()) {
                tracing::debug!("Request was slow");
            }
        }
    }
    .instrument(span)
    .await;
}

async fn call_inventory(instruments: &Instruments) {
    let span = instruments
        .client_spans
        .map(|spans| spans.span("GET", "http://inventory.internal/items"))
        .unwrap_or_else(tracing::Span::none);

    let started = Instant::now();
    tokio::time::sleep(Duration::from_millis(20))
        .instrument(span)
        .await;

    if let Some(client) = &instruments.http_client {
        client.record("GET", "inventory.internal", 200, started.elapsed());
    }
}
