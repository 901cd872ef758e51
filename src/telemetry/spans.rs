// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::time::Instant;

use tracing::{info_span, Span};

/// Extension trait for recording outcomes on a span.
pub trait SpanExt {
    /// Record `success` for an operation result.
    fn record_result<T, E>(&self, result: &Result<T, E>);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>) {
        self.record("success", result.is_ok());
    }
}

/// Timing guard for one upload or daemon operation.
///
/// On [`finish`](Self::finish) the duration goes to the global operation
/// metrics and the span gets `duration_ms`, `success` and `events`.
pub struct TimedOperation {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl TimedOperation {
    pub fn start(name: &'static str) -> Self {
        let span = info_span!(
            "operation",
            op = name,
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
            events = tracing::field::Empty,
        );
        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record how many events the operation handled.
    pub fn record_events(&self, events: usize) {
        self.span.record("events", events as u64);
    }

    pub fn finish<T, E>(self, result: &Result<T, E>) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record_result(result);

        #[cfg(feature = "telemetry")]
        super::metrics::GLOBAL_METRICS.record_operation(self.name, duration);

        tracing::debug!(parent: &self.span, op = self.name, ?duration, "Operation complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_finish_records_operation() {
        let op = TimedOperation::start("test.timed_operation");
        op.record_events(3);
        op.finish::<(), ()>(&Ok(()));

        let metrics = super::super::metrics::GLOBAL_METRICS
            .operation_metrics("test.timed_operation")
            .unwrap();
        assert!(metrics.count >= 1);
    }
}
