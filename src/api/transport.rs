// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Authenticated HTTP transport with retries.
//!
//! One [`Transport`] is shared (behind an `Arc`) by every resource client in
//! the process so they reuse the same connection pool. The underlying
//! `reqwest::Client` is built lazily on first use.
//!
//! # Retries
//!
//! Requests marked idempotent (all GETs, plus POSTs whose bodies the backend
//! deduplicates) are retried on network errors, timeouts and 5xx responses,
//! with exponential backoff from [`RetryPolicy`]. 4xx responses are returned
//! immediately. A 401 becomes [`TransportError::Unauthorized`].

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::TransportError;

use super::auth::{Credentials, MissingCredential};
use super::failure::FailureReporter;
use super::identity::ClientIdentity;
use super::retry::RetryPolicy;

/// Default backend domain; the API lives at `api.<domain>`.
pub const DEFAULT_DOMAIN: &str = "tracehound.dev";

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Header carrying the CLI version.
pub const VERSION_HEADER: &str = "x-tracehound-cli-version";

/// Header carrying the process-stable client identity.
pub const CLIENT_ID_HEADER: &str = "x-tracehound-client-id";

/// Header marking requests as the agent's own meta-traffic.
pub const CLI_MARKER_HEADER: &str = "x-tracehound-cli";

/// Everything needed to build a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Backend domain, e.g. `tracehound.dev`.
    pub domain: String,
    /// Full base URL override. Plain `http://` requires `allow_insecure_http`.
    pub base_url: Option<String>,
    /// Test mode: permit plain HTTP.
    pub allow_insecure_http: bool,
    pub credentials: Option<Credentials>,
    /// Reported when `credentials` is `None`.
    pub missing_credential: MissingCredential,
    /// Forward proxy URL.
    pub proxy: Option<String>,
    /// Debug only: accept any server certificate.
    pub skip_tls_verify: bool,
    /// Debug only: expect this name on the server certificate instead of the
    /// host in the base URL.
    pub tls_server_name: Option<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub identity: ClientIdentity,
    pub failure_reporter: Arc<FailureReporter>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            base_url: None,
            allow_insecure_http: false,
            credentials: None,
            missing_credential: MissingCredential::Any,
            proxy: None,
            skip_tls_verify: false,
            tls_server_name: None,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            identity: ClientIdentity::process(),
            failure_reporter: FailureReporter::global(),
        }
    }
}

impl TransportConfig {
    /// Config pointing at an explicit base URL in test mode.
    pub fn for_base_url(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            allow_insecure_http: true,
            credentials,
            failure_reporter: Arc::new(FailureReporter::new()),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_reporter(mut self, reporter: Arc<FailureReporter>) -> Self {
        self.failure_reporter = reporter;
        self
    }

    /// Resolve and validate the base URL.
    fn resolve_base_url(&self) -> Result<Url, TransportError> {
        let raw = match &self.base_url {
            Some(url) => url.clone(),
            None => {
                let domain = self.domain.trim().trim_end_matches('/');
                if domain.is_empty() || domain.contains('/') {
                    return Err(TransportError::Config(format!("invalid domain {:?}", self.domain)));
                }
                format!("https://api.{}", domain)
            }
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| TransportError::Config(format!("invalid base URL {:?}: {}", raw, e)))?;
        // Request paths are joined relative to the base, so a path prefix
        // must end in a slash to survive the join.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_insecure_http => Ok(url),
            "http" => Err(TransportError::Config(format!(
                "refusing plain HTTP base URL {} outside test mode",
                url
            ))),
            other => Err(TransportError::Config(format!("unsupported URL scheme {:?}", other))),
        }
    }
}

/// One API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Stable operation name used for logs and metrics.
    pub operation: &'static str,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub idempotent: bool,
    /// Per-request timeout overriding the transport default.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// A GET request; always idempotent.
    pub fn get(operation: &'static str, path: impl Into<String>) -> Self {
        Self {
            operation,
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            idempotent: true,
            timeout: None,
        }
    }

    /// A POST request with a JSON body; not retried unless marked idempotent.
    pub fn post<B: Serialize>(
        operation: &'static str,
        path: impl Into<String>,
        body: &B,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            operation,
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(serde_json::to_value(body)?),
            idempotent: false,
            timeout: None,
        })
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn queries(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lazily built connection state.
struct Connection {
    client: Client,
    base_url: Url,
}

/// Shared HTTP transport.
pub struct Transport {
    config: TransportConfig,
    base_url: Url,
    connection: OnceCell<Connection>,
}

impl Transport {
    /// Validate the configuration. The HTTP client itself is built on first
    /// use.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let base_url = config.resolve_base_url()?;
        Ok(Self {
            config,
            base_url,
            connection: OnceCell::new(),
        })
    }

    /// Shared handle, the usual way to construct one.
    pub fn shared(config: TransportConfig) -> Result<Arc<Self>, TransportError> {
        Self::new(config).map(Arc::new)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn identity(&self) -> ClientIdentity {
        self.config.identity
    }

    fn connection(&self) -> Result<&Connection, TransportError> {
        self.connection.get_or_try_init(|| self.build_connection())
    }

    fn build_connection(&self) -> Result<Connection, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(VERSION_HEADER, HeaderValue::from_static(crate::VERSION));
        headers.insert(CLI_MARKER_HEADER, HeaderValue::from_static("true"));
        let identity = HeaderValue::from_str(&self.config.identity.to_string())
            .map_err(|e| TransportError::Config(e.to_string()))?;
        headers.insert(CLIENT_ID_HEADER, identity);

        let mut builder = Client::builder()
            .user_agent(format!("tracehound/{}", crate::VERSION))
            .default_headers(headers)
            .timeout(self.config.request_timeout);

        if let Some(proxy) = &self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TransportError::Config(format!("invalid proxy {:?}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        if self.config.skip_tls_verify {
            warn!("TLS certificate verification is disabled; use this only for debugging");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let mut base_url = self.base_url.clone();
        if let Some(server_name) = &self.config.tls_server_name {
            warn!(
                server_name = %server_name,
                target = %self.base_url,
                "Overriding the expected TLS server name; use this only for debugging"
            );
            let host = self
                .base_url
                .host_str()
                .ok_or_else(|| TransportError::Config("base URL has no host".to_string()))?;
            let port = self.base_url.port_or_known_default().unwrap_or(443);
            let addr = (host, port)
                .to_socket_addrs()
                .map_err(|e| TransportError::Config(format!("cannot resolve {}: {}", host, e)))?
                .next()
                .ok_or_else(|| TransportError::Config(format!("no address for {}", host)))?;
            builder = builder.resolve(server_name, addr);
            base_url
                .set_host(Some(server_name))
                .map_err(|e| TransportError::Config(format!("invalid server name: {}", e)))?;
        }

        let client = builder.build()?;
        debug!(base_url = %base_url, "HTTP client initialized");
        Ok(Connection { client, base_url })
    }

    /// GET `path` and decode the JSON response.
    pub async fn get<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: impl Into<String>,
    ) -> Result<T, TransportError> {
        self.send(ApiRequest::get(operation, path)).await
    }

    /// POST a JSON body; not retried.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: impl Into<String>,
        body: &B,
    ) -> Result<T, TransportError> {
        self.send(ApiRequest::post(operation, path, body)?).await
    }

    /// POST a JSON body the backend deduplicates; retried like a GET.
    pub async fn post_idempotent<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: impl Into<String>,
        body: &B,
    ) -> Result<T, TransportError> {
        self.send(ApiRequest::post(operation, path, body)?.idempotent()).await
    }

    /// Send a request, retrying when allowed, and decode the response body.
    ///
    /// Every failure is passed to the configured [`FailureReporter`] before
    /// it is returned.
    #[instrument(skip(self, request), fields(op = request.operation, method = %request.method, path = %request.path))]
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, TransportError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self.send_with_retries(&request).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_api_call(request.operation, start.elapsed(), result.is_ok());

        let result = result.and_then(|body| decode_body(&body));
        if let Err(err) = &result {
            self.config
                .failure_reporter
                .report(&request.method, &request.path, err);
        }
        result
    }

    async fn send_with_retries(&self, request: &ApiRequest) -> Result<Vec<u8>, TransportError> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or(TransportError::MissingCredentials {
                missing: self.config.missing_credential,
            })?;
        let connection = self.connection()?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.send_once(connection, credentials, request).await {
                Ok(body) => return Ok(body),
                Err(err) => {
                    let retryable = request.idempotent && err.is_retryable();
                    if retryable && self.config.retry.allows_another(attempts) {
                        let wait = self.config.retry.backoff(attempts + 1);
                        warn!(
                            attempt = attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %err,
                            "Retrying request"
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    if retryable && attempts > 1 {
                        return Err(TransportError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        connection: &Connection,
        credentials: &Credentials,
        request: &ApiRequest,
    ) -> Result<Vec<u8>, TransportError> {
        let url = connection
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| TransportError::Config(format!("invalid path {:?}: {}", request.path, e)))?;

        let mut builder = connection.client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        builder = credentials.apply(builder.timeout(timeout));

        debug!("Sending request");
        let response = builder.send().await.map_err(|e| map_send_error(e, timeout))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let text = String::from_utf8_lossy(&body).into_owned();
        debug!(status = status.as_u16(), "Request failed");
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized {
                credentials_present: true,
            });
        }
        Err(TransportError::http(status.as_u16(), text))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("initialized", &self.connection.get().is_some())
            .finish()
    }
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.as_millis() as u64)
    } else {
        err.into()
    }
}

/// Decode a response body; an empty body decodes as JSON `null`.
fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_slice(b"null").map_err(TransportError::from);
    }
    serde_json::from_slice(body).map_err(TransportError::from)
}
