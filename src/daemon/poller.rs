// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded long polls and the per-iteration poll state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::api::types::ActiveTraceDiff;
use crate::api::{DirectoryApi, ServiceId, TraceId, LONG_POLL_GRACE};
use crate::error::TransportError;

/// Result of one active-trace poll.
#[derive(Debug)]
pub enum PollOutcome {
    Changed(ActiveTraceDiff),
    /// The server had nothing to report, or the client deadline passed.
    TimedOut,
    Failed(TransportError),
}

/// Result of one deactivation poll.
#[derive(Debug)]
pub enum DeactivationOutcome {
    Deactivated,
    /// Still active when the wait ended.
    TimedOut,
    Failed(TransportError),
}

/// Issues long polls for one service, each bounded by a client deadline of
/// the poll timeout plus a grace period.
#[derive(Clone)]
pub struct LongPoller {
    directory: Arc<dyn DirectoryApi>,
    service: ServiceId,
    poll_timeout: Duration,
    grace: Duration,
}

impl LongPoller {
    pub fn new(directory: Arc<dyn DirectoryApi>, service: ServiceId, poll_timeout: Duration) -> Self {
        Self {
            directory,
            service,
            poll_timeout,
            grace: LONG_POLL_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    fn deadline(&self) -> Duration {
        self.poll_timeout + self.grace
    }

    /// Wait for the backend's active set to differ from `known`.
    pub async fn poll_active_traces(&self, known: &BTreeSet<TraceId>) -> PollOutcome {
        let call = self
            .directory
            .long_poll_active_traces(self.service, known.clone(), self.poll_timeout);
        match tokio::time::timeout(self.deadline(), call).await {
            Err(_) => {
                debug!(service = %self.service, "Active trace poll hit client deadline");
                PollOutcome::TimedOut
            }
            Ok(Ok(diff)) if diff.is_empty() => {
                trace!(service = %self.service, "Active trace poll timed out server-side");
                PollOutcome::TimedOut
            }
            Ok(Ok(diff)) => PollOutcome::Changed(diff),
            Ok(Err(err)) => PollOutcome::Failed(err),
        }
    }

    /// Wait for `trace` to become inactive.
    pub async fn wait_for_deactivation(&self, trace: TraceId) -> DeactivationOutcome {
        let call = self
            .directory
            .long_poll_trace_deactivation(self.service, trace, self.poll_timeout);
        match tokio::time::timeout(self.deadline(), call).await {
            Err(_) => DeactivationOutcome::TimedOut,
            Ok(Ok(activity)) if activity.active => DeactivationOutcome::TimedOut,
            Ok(Ok(_)) => DeactivationOutcome::Deactivated,
            Ok(Err(err)) => DeactivationOutcome::Failed(err),
        }
    }
}

/// Where the poll loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    DiffReceived,
    TimedOut,
    Backoff,
}

/// Poll loop state machine:
///
/// ```text
/// Idle -> Polling -> DiffReceived -> Idle
///                 -> TimedOut     -> Idle
///                 -> Backoff      -> Idle
/// ```
///
/// Consecutive errors double the backoff up to a ceiling; any success
/// resets it.
#[derive(Debug, Clone)]
pub struct PollState {
    phase: PollPhase,
    consecutive_errors: u32,
    error_backoff: Duration,
    max_error_backoff: Duration,
}

impl PollState {
    pub fn new(error_backoff: Duration, max_error_backoff: Duration) -> Self {
        Self {
            phase: PollPhase::Idle,
            consecutive_errors: 0,
            error_backoff,
            max_error_backoff: max_error_backoff.max(error_backoff),
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Enter `Polling`.
    pub fn begin(&mut self) {
        self.phase = PollPhase::Polling;
    }

    /// Record the outcome of the poll in flight.
    pub fn observe(&mut self, outcome: &PollOutcome) {
        self.phase = match outcome {
            PollOutcome::Changed(_) => PollPhase::DiffReceived,
            PollOutcome::TimedOut => PollPhase::TimedOut,
            PollOutcome::Failed(_) => PollPhase::Backoff,
        };
        if self.phase == PollPhase::Backoff {
            self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        } else {
            self.consecutive_errors = 0;
        }
    }

    /// How long to wait before the next poll.
    pub fn next_delay(&self) -> Duration {
        if self.phase != PollPhase::Backoff || self.consecutive_errors == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.consecutive_errors - 1).min(16);
        self.error_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_error_backoff)
    }

    /// Return to `Idle` once the delay has been served.
    pub fn settle(&mut self) {
        self.phase = PollPhase::Idle;
    }
}

impl Default for PollState {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}
