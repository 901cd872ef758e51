// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Failure reporting hook.
//!
//! Every failed API call is handed to at most one registered callback so a
//! telemetry sink can observe failures without the transport knowing about
//! it.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use reqwest::Method;

use crate::error::TransportError;

/// Callback invoked with (method, path, error) for each failed call.
pub type FailureHook = Arc<dyn Fn(&Method, &str, &TransportError) + Send + Sync>;

static GLOBAL_REPORTER: Lazy<Arc<FailureReporter>> = Lazy::new(|| Arc::new(FailureReporter::new()));

/// Holds the single failure callback.
#[derive(Default)]
pub struct FailureReporter {
    hook: RwLock<Option<FailureHook>>,
}

impl FailureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide reporter used by the binary.
    pub fn global() -> Arc<FailureReporter> {
        GLOBAL_REPORTER.clone()
    }

    /// Register the callback. Only the first registration takes effect;
    /// returns false if a hook was already set.
    pub fn register(&self, hook: FailureHook) -> bool {
        let mut slot = match self.hook.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(hook);
        true
    }

    /// Whether a hook has been registered.
    pub fn is_registered(&self) -> bool {
        self.hook.read().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Report one failed call.
    pub fn report(&self, method: &Method, path: &str, err: &TransportError) {
        let hook = match self.hook.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(hook) = hook {
            hook(method, path, err);
        }
    }
}

impl std::fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureReporter")
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_report_without_hook_is_noop() {
        let reporter = FailureReporter::new();
        reporter.report(&Method::GET, "/v1/services", &TransportError::Timeout(10));
        assert!(!reporter.is_registered());
    }

    #[test]
    fn test_register_once() {
        let reporter = FailureReporter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        assert!(reporter.register(Arc::new(move |method, path, err| {
            sink.lock()
                .unwrap()
                .push(format!("{} {} {}", method, path, err.status().unwrap_or(0)));
        })));
        assert!(!reporter.register(Arc::new(|_, _, _| panic!("second hook must not run"))));

        reporter.report(&Method::POST, "/v1/x", &TransportError::http(500, "boom"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), ["POST /v1/x 500"]);
    }
}
