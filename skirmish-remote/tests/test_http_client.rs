/// HttpInteractionClient against a mock interaction API.
use serde_json::json;
use skirmish::classify_error;
use skirmish::{retry_with_backoff, ErrorKind, InteractionApi, RetryConfig, SyncError};
use skirmish_remote::{HttpInteractionClient, RemoteConfig};
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, token: Option<&str>) -> HttpInteractionClient {
    HttpInteractionClient::new(&RemoteConfig {
        api_url: server.uri(),
        api_token: token.map(str::to_string),
        timeout_ms: 500,
    })
}

#[tokio::test]
async fn test_update_sends_patch_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/interactions/I1"))
        .and(header("authorization", "Bearer dm-token"))
        .and(body_json(json!({"status": "INITIATIVE_ROLLED"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("dm-token"));
    client
        .update_interaction("I1", &json!({"status": "INITIATIVE_ROLLED"}))
        .await
        .unwrap();

    assert!(client.last_success_timestamp() > 0);
    assert!(client.status().authenticated);
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    let cases = [
        (401, "I401", ErrorKind::Authentication),
        (403, "I403", ErrorKind::Authorization),
        (422, "I422", ErrorKind::Validation),
        (409, "I409", ErrorKind::Conflict),
        (503, "I503", ErrorKind::Server),
    ];
    for (status, id, _) in &cases {
        Mock::given(method("PATCH"))
            .and(path(format!("/api/interactions/{}", id)))
            .respond_with(
                ResponseTemplate::new(*status).set_body_json(json!({"message": "rejected"})),
            )
            .mount(&server)
            .await;
    }

    let client = client_for(&server, None);
    for (status, id, kind) in cases {
        let err = client
            .update_interaction(id, &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code().map(|s| s.as_u16()), Some(status), "{}", err);
        assert_eq!(classify_error(&err).kind, kind, "{}", err);
    }
    assert_eq!(client.last_success_timestamp(), 0);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let err = client
        .update_interaction("I1", &json!({}))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::Timeout { after_ms: 500 });
    assert!(classify_error(&err).retryable);
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let client = HttpInteractionClient::new(&RemoteConfig {
        api_url: "http://127.0.0.1:1".into(),
        api_token: None,
        timeout_ms: 1_000,
    });
    let err = client
        .update_interaction("I1", &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Network(_)), "{}", err);
    assert_eq!(classify_error(&err).kind, ErrorKind::Network);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let config = RetryConfig {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let patch = json!({"currentTurn": 1});
    retry_with_backoff(|| client.update_interaction("I1", &patch), &config)
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 3);
}
