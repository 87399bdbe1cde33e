use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::Severity;
use crate::lifecycle::{ManagedResource, ResourceKind};

pub(crate) type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Filter applied to every layer.
///
/// An explicitly configured severity wins; otherwise `RUST_LOG` is respected and the
/// default is `info`.
pub(crate) fn severity_filter(severity: Option<Severity>) -> EnvFilter {
    match severity {
        Some(severity) => EnvFilter::default().add_directive(severity.level_filter().into()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Formatted output to stdout, with the thread-identity enricher.
pub(crate) fn console_layer() -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .boxed()
}

/// JSON lines to the rolling file. The correlation enricher adds the current span (and
/// its `correlation_id` field) to every line.
pub(crate) fn file_layer(writer: NonBlocking, correlation: bool) -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_current_span(correlation)
        .with_span_list(correlation)
        .boxed()
}

/// Bridges tracing spans to OTel traces.
pub(crate) fn otel_trace_layer(provider: &SdkTracerProvider, service_name: &str) -> BoxedLayer {
    use opentelemetry::trace::TracerProvider as _;
    tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(service_name.to_owned()))
        .boxed()
}

/// Bridges tracing events to OTel logs.
pub(crate) fn otel_log_layer(provider: &SdkLoggerProvider) -> BoxedLayer {
    opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(provider).boxed()
}

/// Compose the layers under `filter` into a dispatcher. Nothing is installed globally.
pub(crate) fn compose(layers: Vec<BoxedLayer>, filter: EnvFilter) -> Dispatch {
    let subscriber = tracing_subscriber::registry().with(layers).with(filter);
    Dispatch::new(subscriber)
}

/// Install `dispatch` as the process-wide default.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub(crate) fn install(dispatch: Dispatch) -> anyhow::Result<()> {
    tracing::dispatcher::set_global_default(dispatch)
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {e}"))
}

/// The daily rolling file sink. Disposing it flushes buffered lines and stops the
/// writer thread.
pub(crate) struct FileSink {
    path: String,
    guard: Mutex<Option<WorkerGuard>>,
}

impl FileSink {
    /// Open a daily rolling appender for `path`.
    ///
    /// `logs/orders.log` rolls into `logs/orders.2024-05-01.log`, and so on.
    pub(crate) fn open(path: &str) -> anyhow::Result<(Self, NonBlocking)> {
        let path_ref = Path::new(path);
        let directory = path_ref
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let prefix = path_ref
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("File log path `{path}` has no file name"))?;

        let mut builder = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix);
        if let Some(extension) = path_ref.extension() {
            builder = builder.filename_suffix(extension.to_string_lossy().into_owned());
        }
        let appender = builder
            .build(directory)
            .with_context(|| format!("Failed to open rolling log file at `{path}`"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let sink = Self {
            path: path.to_owned(),
            guard: Mutex::new(Some(guard)),
        };
        Ok((sink, writer))
    }
}

impl ManagedResource for FileSink {
    fn kind(&self) -> ResourceKind {
        ResourceKind::LogSink
    }

    fn label(&self) -> String {
        format!("file log sink `{}`", self.path)
    }

    fn dispose(&self) -> anyhow::Result<()> {
        let guard = self
            .guard
            .lock()
            .map_err(|_| anyhow::anyhow!("file sink lock poisoned"))?
            .take();
        drop(guard);
        Ok(())
    }
}
