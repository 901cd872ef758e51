// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend resource types.
//!
//! Identifiers are 16 random bytes rendered as `<prefix>_<hex>`. The
//! all-zero value never names a real resource.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::collector::CollectorEvent;

// ============================================================================
// Identifiers
// ============================================================================

/// Error returned when an identifier string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id {value:?}")]
pub struct ParseIdError {
    kind: &'static str,
    value: String,
}

macro_rules! backend_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Textual prefix of this identifier kind.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap raw bytes.
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// The zero value, which is never a valid resolved identifier.
            pub fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Check whether this is the zero value.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Raw bytes of this identifier.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0.simple())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let err = || ParseIdError {
                    kind: $kind,
                    value: s.to_string(),
                };
                let hex = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .ok_or_else(err)?;
                if hex.len() != 32 {
                    return Err(err());
                }
                Uuid::try_parse(hex).map(Self).map_err(|_| err())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

backend_id!(
    /// Backend-assigned identifier of a service (project).
    ServiceId,
    "svc",
    "service"
);
backend_id!(
    /// Backend-assigned identifier of a trace (learn session).
    TraceId,
    "trc",
    "trace"
);
backend_id!(
    /// Backend-assigned identifier of a spec.
    SpecId,
    "spc",
    "spec"
);

/// Kind of resource a name can resolve to within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Trace,
    Spec,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Spec => "spec",
        }
    }
}

/// Identifier returned by a name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceId {
    Trace(TraceId),
    Spec(SpecId),
}

// ============================================================================
// Tags
// ============================================================================

/// Prefix of tag keys owned by the backend.
pub const RESERVED_TAG_PREFIX: &str = "x-tracehound-";

/// Unordered string key/value annotations on traces and specs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check whether `key` is backend-owned.
    pub fn is_reserved(key: &str) -> bool {
        key.to_ascii_lowercase().starts_with(RESERVED_TAG_PREFIX)
    }

    /// Remove backend-owned keys, returning the keys that were dropped.
    pub fn strip_reserved(&mut self) -> Vec<String> {
        let reserved: Vec<String> = self
            .0
            .keys()
            .filter(|k| Self::is_reserved(k))
            .cloned()
            .collect();
        for key in &reserved {
            self.0.remove(key);
        }
        reserved
    }

    /// Check that every expected tag is present with exactly the same value.
    ///
    /// A missing key never matches a non-empty expected value.
    pub fn matches(&self, expected: &TagSet) -> bool {
        expected.iter().all(|(key, want)| match self.get(key) {
            Some(have) => have == want,
            None => want.is_empty(),
        })
    }

    /// Render as query pairs (`tag=key:value`), used for list filters.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(k, v)| ("tag".to_string(), format!("{}:{}", k, v)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Error returned when a `key=value` tag argument is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tag {0:?}, expected key=value")]
pub struct ParseTagError(String);

/// Parse a `key=value` tag argument.
pub fn parse_tag(arg: &str) -> Result<(String, String), ParseTagError> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ParseTagError(arg.to_string())),
    }
}

// ============================================================================
// Directory resources
// ============================================================================

/// A (name, id) pair as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource<I> {
    pub id: I,
    pub name: String,
}

/// Summary of a service as returned by the directory listing.
pub type ServiceSummary = NamedResource<ServiceId>;

/// Heartbeat payload sent periodically by a running daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub client_id: Uuid,
    pub cli_version: String,
    pub active_traces: Vec<TraceId>,
    pub sent_at: DateTime<Utc>,
}

/// Body of the active-trace long poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTraceQuery {
    pub known_active: BTreeSet<TraceId>,
    pub timeout_secs: u64,
}

/// Difference between the daemon's known set of active traces and the
/// backend's.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTraceDiff {
    #[serde(default)]
    pub activated: Vec<TraceInfo>,
    #[serde(default)]
    pub deactivated: Vec<TraceId>,
}

impl ActiveTraceDiff {
    /// An empty diff means the server-side wait elapsed without a change.
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }
}

/// Response of the single-trace deactivation long poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceActivity {
    pub active: bool,
}

// ============================================================================
// Session resources
// ============================================================================

/// A trace as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub id: TraceId,
    pub service_id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Request to create a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTraceRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
    /// Spec whose knowledge the new trace extends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_spec: Option<SpecId>,
}

/// A batch of events appended to a trace.
///
/// `batch_id` is derived from the batch contents so a resubmitted batch is
/// recognized and deduplicated by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub batch_id: String,
    pub client_id: Uuid,
    pub events: Vec<CollectorEvent>,
}

/// Acknowledgement of an appended batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppendResponse {
    #[serde(default)]
    pub accepted: usize,
}

/// Inclusive range of spec version labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Request to build a spec from one or more traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSpecRequest {
    pub traces: Vec<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_exclusions: Vec<String>,
    #[serde(default, skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<VersionRange>,
}

/// Response to a spec creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSpecResponse {
    pub id: SpecId,
}

/// Lifecycle state of a spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecState {
    Unspecified,
    Computing,
    Done,
    Error,
}

/// A spec as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecInfo {
    pub id: SpecId,
    pub name: String,
    pub state: SpecState,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub version_labels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response of a name lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveNameResponse {
    pub id: String,
}

/// One changed endpoint in a spec diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointChange {
    pub method: String,
    pub path: String,
    pub change: String,
}

/// Structural difference between two specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecDiff {
    #[serde(default)]
    pub added: Vec<EndpointChange>,
    #[serde(default)]
    pub removed: Vec<EndpointChange>,
    #[serde(default)]
    pub modified: Vec<EndpointChange>,
}
