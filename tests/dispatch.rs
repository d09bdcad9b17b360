//! Router integration tests against a mock HTTP provider.
//!
//! These exercise the full dispatch stack: real HTTP via wiremock,
//! JSON parsing, retry-within-provider, fallback-across-providers,
//! the total-time ceiling, and cancellation.

use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use iri::config::RouterConfig;
use iri::{
    DispatchRequest, DispatchResult, FailureKind, ProviderDescriptor, ProviderRouter, TaskCategory,
    Turn,
};

fn descriptor(name: &str, server: &MockServer, priority: u32, timeout_ms: u64) -> ProviderDescriptor {
    serde_json::from_value(json!({
        "name": name,
        "endpoint": format!("{}/v1/chat/completions", server.uri()),
        "model_id": format!("{name}-model"),
        "max_tokens": 256,
        "timeout_ms": timeout_ms,
        "priority": priority,
    }))
    .expect("valid descriptor")
}

fn router(category: &str, chain: Vec<ProviderDescriptor>, max_total_time_ms: u64) -> ProviderRouter {
    let mut config = RouterConfig {
        max_total_time_ms,
        ..RouterConfig::default()
    };
    config.routes.insert(category.to_string(), chain);
    ProviderRouter::new(&config).expect("valid router config")
}

fn request(category: TaskCategory) -> DispatchRequest {
    DispatchRequest::new(
        category,
        vec![Turn::system("sys"), Turn::user("cuánto es 2 más 2")],
    )
}

fn chat_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 7, "completion_tokens": 4, "total_tokens": 11}
    })
}

#[tokio::test]
async fn primary_success_returns_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "primary-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("son 4")))
        .expect(1)
        .mount(&server)
        .await;

    let router = router("general", vec![descriptor("primary", &server, 0, 2000)], 30_000);
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    match result {
        DispatchResult::Success { content, usage } => {
            assert_eq!(content, "son 4");
            assert_eq!(usage.prompt_units, 7);
            assert_eq!(usage.completion_units, 4);
        }
        DispatchResult::Failure { message, .. } => panic!("expected success, got: {message}"),
    }
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("hola")))
        .expect(1)
        .mount(&server)
        .await;

    // SAFETY: test-local env var, no concurrent reader of this name.
    unsafe { std::env::set_var("IRI_DISPATCH_TEST_KEY", "sk-test-token") };
    let mut desc = descriptor("primary", &server, 0, 2000);
    desc.api_key_env = Some("IRI_DISPATCH_TEST_KEY".into());

    let router = router("general", vec![desc], 30_000);
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;
    assert!(result.is_success());
}

#[tokio::test]
async fn transient_5xx_retries_then_falls_back() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(2) // initial call + one retry, then fallback
        .mount(&primary)
        .await;

    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("desde el backup")))
        .expect(1)
        .mount(&secondary)
        .await;

    let router = router(
        "general",
        vec![
            descriptor("primary", &primary, 0, 2000),
            descriptor("backup", &secondary, 1, 2000),
        ],
        30_000,
    );
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    match result {
        DispatchResult::Success { content, .. } => assert_eq!(content, "desde el backup"),
        DispatchResult::Failure { message, .. } => panic!("expected fallback success: {message}"),
    }
}

#[tokio::test]
async fn permanent_4xx_falls_back_without_retry() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "invalid key", "code": "invalid_api_key"}
        })))
        .expect(1) // no retry on 4xx
        .mount(&primary)
        .await;

    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("ok")))
        .expect(1)
        .mount(&secondary)
        .await;

    let start = Instant::now();
    let router = router(
        "general",
        vec![
            descriptor("primary", &primary, 0, 2000),
            descriptor("backup", &secondary, 1, 2000),
        ],
        30_000,
    );
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    assert!(result.is_success());
    // No backoff on the permanent-failure path.
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn all_4xx_exhausts_every_provider_quickly() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"message": "quota exceeded", "code": "quota"}
        })))
        .expect(1)
        .mount(&primary)
        .await;

    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "bad request"}
        })))
        .expect(1)
        .mount(&secondary)
        .await;

    let router = router(
        "general",
        vec![
            descriptor("primary", &primary, 0, 2000),
            descriptor("backup", &secondary, 1, 2000),
        ],
        30_000,
    );
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    match result {
        DispatchResult::Failure {
            kind,
            message,
            retryable,
        } => {
            assert_eq!(kind, FailureKind::AllProvidersExhausted);
            assert!(!retryable);
            assert!(message.contains("backup"), "last failure named: {message}");
        }
        DispatchResult::Success { .. } => panic!("every provider was 4xx"),
    }
}

#[tokio::test]
async fn timing_out_primary_falls_back_to_secondary() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_body("demasiado tarde"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&slow)
        .await;

    let fast = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("a tiempo")))
        .expect(1)
        .mount(&fast)
        .await;

    let start = Instant::now();
    let router = router(
        "general",
        vec![
            descriptor("slow", &slow, 0, 50),
            descriptor("fast", &fast, 1, 2000),
        ],
        30_000,
    );
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    match result {
        DispatchResult::Success { content, .. } => assert_eq!(content, "a tiempo"),
        DispatchResult::Failure { message, .. } => panic!("expected fallback success: {message}"),
    }
    // Two timed-out attempts plus one bounded backoff.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn total_time_ceiling_is_enforced() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("boom")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&failing)
        .await;

    let router = router("general", vec![descriptor("failing", &failing, 0, 2000)], 250);
    let result = router
        .dispatch(&request(TaskCategory::General), &CancellationToken::new())
        .await;

    match result {
        DispatchResult::Failure { kind, .. } => assert_eq!(kind, FailureKind::DeadlineExceeded),
        DispatchResult::Success { .. } => panic!("provider only fails"),
    }
}

#[tokio::test]
async fn cancellation_unblocks_an_in_flight_call() {
    let hanging = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_body("nunca llega"))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&hanging)
        .await;

    let router = router("general", vec![descriptor("hanging", &hanging, 0, 60_000)], 120_000);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let result = router.dispatch(&request(TaskCategory::General), &cancel).await;

    match result {
        DispatchResult::Failure { kind, .. } => assert_eq!(kind, FailureKind::Cancelled),
        DispatchResult::Success { .. } => panic!("dispatch was cancelled"),
    }
    // Cancellation unblocks immediately, not after the call timeout.
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn resume_attempt_index_skips_earlier_providers() {
    let primary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("del primario")))
        .expect(0)
        .mount(&primary)
        .await;

    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("del secundario")))
        .expect(1)
        .mount(&secondary)
        .await;

    let router = router(
        "general",
        vec![
            descriptor("primary", &primary, 0, 2000),
            descriptor("backup", &secondary, 1, 2000),
        ],
        30_000,
    );
    let mut req = request(TaskCategory::General);
    req.attempt = 1;
    let result = router.dispatch(&req, &CancellationToken::new()).await;

    match result {
        DispatchResult::Success { content, .. } => assert_eq!(content, "del secundario"),
        DispatchResult::Failure { message, .. } => panic!("expected success: {message}"),
    }
}
