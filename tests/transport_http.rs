// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport behavior against a local HTTP backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{basic_auth, bearer_token, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tracehound::api::types::{CreateTraceRequest, EventBatch, ResourceId, ResourceKind};
use tracehound::api::{
    Credentials, DirectoryApi, DirectoryClient, FailureReporter, MissingCredential, RetryPolicy,
    ServiceId,
    SessionApi, SessionClient, TagSet, TraceId, Transport, TransportConfig,
};
use tracehound::error::TransportError;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        min_wait: Duration::from_millis(1),
        max_wait: Duration::from_millis(5),
        max_attempts: 3,
    }
}

fn api_key() -> Option<Credentials> {
    Credentials::from_parts(Some("test-key"), Some("staging"), None, None)
}

fn transport(server: &MockServer) -> Arc<Transport> {
    Transport::shared(TransportConfig::for_base_url(server.uri(), api_key()).with_retry(fast_retry()))
        .unwrap()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

fn trace_json(service: ServiceId, trace: TraceId, name: &str) -> serde_json::Value {
    json!({
        "id": trace.to_string(),
        "service_id": service.to_string(),
        "name": name,
        "active": false,
    })
}

#[tokio::test]
async fn test_retries_server_error_then_succeeds() {
    let server = MockServer::start().await;
    let service = ServiceId::random();

    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": service.to_string(), "name": "checkout"}])),
        )
        .mount(&server)
        .await;

    let services = DirectoryClient::new(transport(&server))
        .list_services()
        .await
        .unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].id, service);
    assert_eq!(services[0].name, "checkout");
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = DirectoryClient::new(transport(&server))
        .list_services()
        .await
        .unwrap_err();
    match err {
        TransportError::RetriesExhausted { attempts, ref last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.status(), Some(502));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = DirectoryClient::new(transport(&server))
        .list_services()
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Unauthorized { .. }));
    assert!(err.to_string().contains("rejected your API credentials"));
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let trace = TraceId::random();
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/traces/{}", service, trace)))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such trace"))
        .mount(&server)
        .await;

    let err = SessionClient::new(transport(&server), service)
        .get_session(trace)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_retryable());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_api_key_and_client_headers() {
    let server = MockServer::start().await;
    let transport = transport(&server);
    let client_id = transport.identity().to_string();

    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .and(bearer_token("test-key"))
        .and(header("x-tracehound-env", "staging"))
        .and(header("x-tracehound-cli-version", tracehound::VERSION))
        .and(header("x-tracehound-client-id", client_id.as_str()))
        .and(header_exists("x-tracehound-cli"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let services = DirectoryClient::new(transport).list_services().await.unwrap();
    assert!(services.is_empty());
}

#[tokio::test]
async fn test_key_id_and_secret_use_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .and(basic_auth("kid", "shh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials::from_parts(None, None, Some("kid"), Some("shh"));
    let transport = Transport::shared(TransportConfig::for_base_url(server.uri(), credentials)).unwrap();
    DirectoryClient::new(transport).list_services().await.unwrap();
}

#[tokio::test]
async fn test_missing_credentials_send_nothing() {
    let server = MockServer::start().await;
    let transport = Transport::shared(TransportConfig::for_base_url(server.uri(), None)).unwrap();

    let err = DirectoryClient::new(transport).list_services().await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::MissingCredentials {
            missing: MissingCredential::Any
        }
    ));
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_half_key_pair_names_missing_secret() {
    let server = MockServer::start().await;
    let mut config = TransportConfig::for_base_url(server.uri(), None);
    config.missing_credential = match Credentials::resolve(None, None, Some("kid"), None) {
        Err(missing) => missing,
        Ok(_) => panic!("half a key pair must not resolve"),
    };
    let transport = Transport::shared(config).unwrap();

    let err = DirectoryClient::new(transport).list_services().await.unwrap_err();
    assert!(matches!(
        err,
        TransportError::MissingCredentials {
            missing: MissingCredential::KeySecret
        }
    ));
    assert!(err.to_string().contains("TRACEHOUND_API_KEY_SECRET"));
    assert_eq!(request_count(&server).await, 0);
}

#[tokio::test]
async fn test_base_url_path_prefix_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prefix/v1/services"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let config =
        TransportConfig::for_base_url(format!("{}/prefix", server.uri()), api_key()).with_retry(fast_retry());
    let transport = Transport::shared(config).unwrap();
    let services = DirectoryClient::new(transport).list_services().await.unwrap();
    assert!(services.is_empty());

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/prefix/v1/services".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_shares_one_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&server)
        .await;

    let transport = transport(&server);
    let calls: Vec<_> = (0..8)
        .map(|_| {
            let client = DirectoryClient::new(transport.clone());
            tokio::spawn(async move { client.list_services().await })
        })
        .collect();
    for call in calls {
        assert!(call.await.unwrap().unwrap().is_empty());
    }

    assert_eq!(request_count(&server).await, 8);
}

#[tokio::test]
async fn test_plain_http_needs_test_mode() {
    let server = MockServer::start().await;
    let config = TransportConfig {
        base_url: Some(server.uri()),
        credentials: api_key(),
        ..TransportConfig::default()
    };
    let err = Transport::new(config).unwrap_err();
    assert!(matches!(err, TransportError::Config(_)));
}

#[tokio::test]
async fn test_append_is_retried_but_create_is_not() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let trace = TraceId::random();

    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/traces/{}/events", service, trace)))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/traces/{}/events", service, trace)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accepted": 0})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/traces", service)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sessions = SessionClient::new(transport(&server), service);
    let batch = EventBatch {
        batch_id: "abc".to_string(),
        client_id: uuid::Uuid::new_v4(),
        events: vec![],
    };
    sessions.append_events(trace, batch).await.unwrap();

    let err = sessions
        .create_session(CreateTraceRequest {
            name: "nightly-run".to_string(),
            tags: TagSet::new(),
            base_spec: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));

    let requests = server.received_requests().await.unwrap();
    let appends = requests.iter().filter(|r| r.url.path().ends_with("/events")).count();
    let creates = requests.iter().filter(|r| r.url.path().ends_with("/traces")).count();
    assert_eq!(appends, 3);
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_failure_reporter_sees_each_failed_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/services"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let seen = Arc::new(AtomicUsize::new(0));
    let reporter = Arc::new(FailureReporter::new());
    let counter = seen.clone();
    assert!(reporter.register(Arc::new(
        move |method: &reqwest::Method, path: &str, err: &TransportError| {
            assert_eq!(method.as_str(), "GET");
            assert_eq!(path, "/v1/services");
            assert_eq!(err.status(), Some(403));
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )));

    let transport = Transport::shared(
        TransportConfig::for_base_url(server.uri(), api_key()).with_failure_reporter(reporter),
    )
    .unwrap();
    let directory = DirectoryClient::new(transport);
    assert!(directory.list_services().await.is_err());
    assert!(directory.list_services().await.is_err());
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_list_sessions_filters_by_tags() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let kept = TraceId::random();

    let mut tagged = trace_json(service, kept, "tagged");
    tagged["tags"] = json!({"team": "payments"});
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/traces", service)))
        .and(query_param("tag", "team:payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            tagged,
            trace_json(service, TraceId::random(), "untagged"),
        ])))
        .mount(&server)
        .await;

    let mut tags = TagSet::new();
    tags.insert("team", "payments");
    let traces = SessionClient::new(transport(&server), service)
        .list_sessions(tags)
        .await
        .unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].id, kept);
}

#[tokio::test]
async fn test_resolve_name_treats_missing_and_nil_as_none() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let spec = tracehound::api::SpecId::random();

    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/ids", service)))
        .and(query_param("name", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": spec.to_string()})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/ids", service)))
        .and(query_param("name", "ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/ids", service)))
        .and(query_param("name", "nil"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": tracehound::api::SpecId::nil().to_string()})),
        )
        .mount(&server)
        .await;

    let sessions = SessionClient::new(transport(&server), service);
    assert_eq!(
        sessions.resolve_name(ResourceKind::Spec, "v1".to_string()).await.unwrap(),
        Some(ResourceId::Spec(spec))
    );
    assert_eq!(
        sessions.resolve_name(ResourceKind::Spec, "ghost".to_string()).await.unwrap(),
        None
    );
    assert_eq!(
        sessions.resolve_name(ResourceKind::Spec, "nil".to_string()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_spec_operations() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let trace = TraceId::random();
    let base = tracehound::api::SpecId::random();
    let head = tracehound::api::SpecId::random();

    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/specs", service)))
        .and(wiremock::matchers::body_partial_json(json!({
            "traces": [trace.to_string()],
            "path_exclusions": ["^/health$"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": head.to_string()})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/spec-versions/by-label", service)))
        .and(query_param("label", "v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": head.to_string(),
            "name": "checkout-v2",
            "state": "done",
            "version_labels": ["v2"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/services/{}/specs/{}/diff/{}", service, base, head)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "added": [{"method": "POST", "path": "/refunds", "change": "added"}],
        })))
        .mount(&server)
        .await;

    let sessions = SessionClient::new(transport(&server), service);
    let created = sessions
        .create_spec(tracehound::api::CreateSpecRequest {
            traces: vec![trace],
            path_exclusions: vec!["^/health$".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created.id, head);

    let spec = sessions.get_spec_by_version("v2".to_string()).await.unwrap();
    assert_eq!(spec.id, head);
    assert_eq!(spec.version_labels, vec!["v2"]);

    let diff = sessions.get_spec_diff(base, head).await.unwrap();
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].path, "/refunds");
    assert!(diff.removed.is_empty());
}

#[tokio::test]
async fn test_directory_long_polls_and_heartbeat() {
    let server = MockServer::start().await;
    let service = ServiceId::random();
    let known = TraceId::random();
    let fresh = TraceId::random();

    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/daemon/long-poll", service)))
        .and(wiremock::matchers::body_partial_json(json!({
            "known_active": [known.to_string()],
            "timeout_secs": 30,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "activated": [trace_json(service, fresh, "fresh")],
            "deactivated": [known.to_string()],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/v1/services/{}/traces/{}/long-poll-inactive",
            service, fresh
        )))
        .and(query_param("timeout_secs", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/services/{}/heartbeat", service)))
        .and(wiremock::matchers::body_partial_json(json!({
            "cli_version": tracehound::VERSION,
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let directory = DirectoryClient::new(transport(&server));
    let diff = directory
        .long_poll_active_traces(service, [known].into_iter().collect(), Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(diff.activated[0].id, fresh);
    assert_eq!(diff.deactivated, vec![known]);

    let activity = directory
        .long_poll_trace_deactivation(service, fresh, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!activity.active);

    directory
        .send_heartbeat(
            service,
            tracehound::api::types::Heartbeat {
                client_id: uuid::Uuid::new_v4(),
                cli_version: tracehound::VERSION.to_string(),
                active_traces: vec![fresh],
                sent_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();
}
