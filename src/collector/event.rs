// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Observed traffic events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the connection the event was seen from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// What the event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Request,
    Response,
    Connection,
    TlsHandshake,
    /// Bytes that could not be parsed as HTTP.
    Unparsed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Connection => "connection",
            Self::TlsHandshake => "tls_handshake",
            Self::Unparsed => "unparsed",
        }
    }

    /// Whether this kind carries an HTTP request or response.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }
}

/// One observed request, response or connection-level fact.
///
/// Events are values: stages that annotate an event produce a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorEvent {
    /// Pairs a request with its response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub direction: Direction,
    pub kind: EventKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CollectorEvent {
    /// An outbound HTTP request observed now.
    pub fn request(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: None,
            direction: Direction::Outbound,
            kind: EventKind::Request,
            host: host.into(),
            path: path.into(),
            method: Some(method.into()),
            status: None,
            observed_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    /// An HTTP response observed now.
    pub fn response(status: u16, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: None,
            direction: Direction::Inbound,
            kind: EventKind::Response,
            host: host.into(),
            path: path.into(),
            method: None,
            status: Some(status),
            observed_at: Utc::now(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Copy of this event carrying `request_id`.
    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..self.clone()
        }
    }

    /// Host with any port stripped, lowercased.
    pub fn host_name(&self) -> String {
        let host = self.host.trim();
        let bare = match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
                name
            }
            _ => host,
        };
        bare.trim_end_matches('.').to_lowercase()
    }
}
