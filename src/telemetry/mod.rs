// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Logging**: `tracing` events and spans, installed with
//!   [`init_telemetry`]. Logs go to stderr.
//! - **Metrics**: per-call latency and event counts in
//!   [`GLOBAL_METRICS`], recorded when the `telemetry` feature is on.
//!
//! ```rust,ignore
//! use tracehound::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::for_verbosity(1))?;
//! ```
//!
//! Public async entry points carry `#[instrument]`; record names, IDs and
//! counts as fields, never credentials.

mod init;
pub mod metrics;
mod spans;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    ApiCallMetrics, Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS,
};
pub use spans::{SpanExt, TimedOperation};
