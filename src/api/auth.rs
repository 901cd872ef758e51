// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API credentials.
//!
//! Credential storage is someone else's job; this module only consumes the
//! resolved values and knows how to attach them to a request.

use std::fmt;

use reqwest::RequestBuilder;

/// Header carrying the environment tag of an API key.
pub const ENVIRONMENT_HEADER: &str = "x-tracehound-env";

/// Resolved credentials used to authenticate every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Single API key sent as a bearer token.
    ApiKey {
        key: String,
        environment: Option<String>,
    },
    /// Key ID and secret sent with basic auth.
    Basic { key_id: String, secret: String },
}

/// The piece that kept a complete credential set from being formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingCredential {
    /// Nothing was supplied.
    #[default]
    Any,
    /// A key ID was supplied without its secret.
    KeySecret,
    /// A secret was supplied without its key ID.
    KeyId,
}

impl fmt::Display for MissingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(
                "No API credentials configured. Set TRACEHOUND_API_KEY, or both \
                 TRACEHOUND_API_KEY_ID and TRACEHOUND_API_KEY_SECRET, or add them to your config file",
            ),
            Self::KeySecret => f.write_str(
                "Missing API key secret: an API key ID is configured but \
                 TRACEHOUND_API_KEY_SECRET (apiKeySecret) is not set",
            ),
            Self::KeyId => f.write_str(
                "Missing API key ID: an API key secret is configured but \
                 TRACEHOUND_API_KEY_ID (apiKeyId) is not set",
            ),
        }
    }
}

impl Credentials {
    /// Build credentials from the optional pieces supplied by config.
    ///
    /// An API key wins over a key ID/secret pair. Blank values count as
    /// missing. When neither source is complete, the error names the piece
    /// that is absent.
    pub fn resolve(
        api_key: Option<&str>,
        environment: Option<&str>,
        key_id: Option<&str>,
        secret: Option<&str>,
    ) -> Result<Self, MissingCredential> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);

        if let Some(key) = present(api_key) {
            return Ok(Self::ApiKey {
                key,
                environment: present(environment),
            });
        }

        match (present(key_id), present(secret)) {
            (Some(key_id), Some(secret)) => Ok(Self::Basic { key_id, secret }),
            (Some(_), None) => Err(MissingCredential::KeySecret),
            (None, Some(_)) => Err(MissingCredential::KeyId),
            (None, None) => Err(MissingCredential::Any),
        }
    }

    /// Like [`Credentials::resolve`], dropping the reason.
    pub fn from_parts(
        api_key: Option<&str>,
        environment: Option<&str>,
        key_id: Option<&str>,
        secret: Option<&str>,
    ) -> Option<Self> {
        Self::resolve(api_key, environment, key_id, secret).ok()
    }

    /// Attach these credentials to an outgoing request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey { key, environment } => {
                let request = request.bearer_auth(key);
                match environment {
                    Some(env) => request.header(ENVIRONMENT_HEADER, env),
                    None => request,
                }
            }
            Self::Basic { key_id, secret } => request.basic_auth(key_id, Some(secret)),
        }
    }

    /// Short description of the credential source, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "api-key",
            Self::Basic { .. } => "key-id/secret",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { environment, .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .field("environment", environment)
                .finish(),
            Self::Basic { key_id, .. } => f
                .debug_struct("Basic")
                .field("key_id", key_id)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}
