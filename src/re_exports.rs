//! Curated re-exports of the crates telemetry handles are built from.
//!
//! Handles hand out `opentelemetry` tracers and meters, and the composed subscriber is a
//! `tracing` dispatcher. These re-exports let users work with both without adding
//! direct dependencies on `opentelemetry`, `opentelemetry_sdk`, or `tracing-subscriber`
//! to their own `Cargo.toml`.

/// Re-export of the `tracing` crate for convenient access.
pub use tracing;

/// Re-export of `tracing_subscriber`, for layering extra sinks next to the composed ones.
pub use tracing_subscriber;

/// Re-export of the `opentelemetry` API crate.
pub use opentelemetry;

/// Re-export of the `opentelemetry_sdk` crate.
pub use opentelemetry_sdk;

/// Re-export of `tracing_opentelemetry` for span context extensions.
pub use tracing_opentelemetry;
