//! 웹훅/저장소 싱크 통합 테스트 -- 실제 HTTP 왕복 (wiremock)

mod common;

use std::time::Duration;

use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use screlay_delivery::{
    BackoffPolicy, ClientSnapshot, SinkOutcome, SinkStatus, StoreSink, StoreSinkConfig,
    WebhookFormat, WebhookSink, WebhookSinkConfig,
};

use common::event;

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20))
}

fn webhook_config(server: &MockServer) -> WebhookSinkConfig {
    let mut config = WebhookSinkConfig::new(format!("{}/hook", server.uri()));
    config.backoff = fast_backoff();
    config.request_timeout = Duration::from_secs(2);
    config
}

fn store_config(server: &MockServer) -> StoreSinkConfig {
    let mut config = StoreSinkConfig::new(server.uri(), "service-key");
    config.backoff = fast_backoff();
    config.max_retries = 1;
    config.request_timeout = Duration::from_secs(2);
    config
}

fn ctx() -> ClientSnapshot {
    ClientSnapshot {
        username: "ElKoukra".to_owned(),
        shard: "pub_euw1b".to_owned(),
        version: "0.1.0".to_owned(),
    }
}

async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

/// 5xx는 재시도되고 성공하면 시도 횟수가 보고된다
#[tokio::test]
async fn test_webhook_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut sink = WebhookSink::new(webhook_config(&server)).unwrap();
    let e = event("actor_stall", &[("player", "ElKoukra")]);
    let outcome = sink.deliver(&e, "ElKoukra: Stalled").await;

    assert_eq!(outcome, SinkOutcome::Delivered { attempts: 3 });
    let bodies = bodies(&server).await;
    assert_eq!(bodies.len(), 3);
    assert_eq!(bodies[2]["content"], "ElKoukra: Stalled");
    let state = sink.state().snapshot();
    assert_eq!(state.delivered, 1);
    assert_eq!(state.consecutive_failure_count, 0);
}

/// 429, 5xx 외의 4xx는 재시도 없이 버린다
#[tokio::test]
async fn test_webhook_client_error_dropped_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .mount(&server)
        .await;

    let mut sink = WebhookSink::new(webhook_config(&server)).unwrap();
    let outcome = sink.deliver(&event("corpse", &[]), "x").await;

    assert_eq!(outcome, SinkOutcome::Dropped { reason: "rejected" });
    assert_eq!(bodies(&server).await.len(), 1);
    let state = sink.state().snapshot();
    assert_eq!(state.dropped, 1);
    assert!(state.last_error.unwrap().contains("400"));
}

/// 재시도 소진 후 냉각 중에는 전송을 시도하지 않는다
#[tokio::test]
async fn test_webhook_cooldown_after_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = webhook_config(&server);
    config.max_retries = 1;
    config.backoff = BackoffPolicy::new(Duration::from_millis(300), Duration::from_secs(5));
    let mut sink = WebhookSink::new(config).unwrap();

    let first = sink.deliver(&event("corpse", &[]), "a").await;
    assert_eq!(first, SinkOutcome::Dropped { reason: "retries_exhausted" });
    assert_eq!(sink.state().status(), SinkStatus::Backoff);

    let second = sink.deliver(&event("corpse", &[]), "b").await;
    assert_eq!(second, SinkOutcome::Dropped { reason: "cooldown" });
    assert_eq!(bodies(&server).await.len(), 2);
    assert_eq!(sink.state().snapshot().dropped, 2);
}

/// 선택된 이벤트 타입은 보조 웹훅으로 간다
#[tokio::test]
async fn test_webhook_secondary_routing_and_embed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut config = webhook_config(&server);
    config.secondary_url = Some(format!("{}/technical", server.uri()));
    config.secondary_event_types.insert("actor_stall".to_owned());
    config.format = WebhookFormat::Embed;
    let mut sink = WebhookSink::new(config).unwrap();

    sink.deliver(&event("actor_stall", &[("player", "P")]), "P: Stalled")
        .await;
    sink.deliver(&event("player_death", &[("victim", "V")]), "V died")
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.path(), "/technical");
    assert_eq!(requests[1].url.path(), "/hook");
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["embeds"][0]["title"], "Actor Stall");
    assert_eq!(body["embeds"][0]["description"], "P: Stalled");
}

/// 주요 플레이어가 얽힌 이벤트는 기술 채널에 CSV 요약이 추가로 간다
#[tokio::test]
async fn test_webhook_important_player_sends_technical_line() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut config = webhook_config(&server);
    config.secondary_url = Some(format!("{}/technical", server.uri()));
    config.important_players.insert("Alice".to_owned());
    let mut sink = WebhookSink::new(config).unwrap();

    let watched = event(
        "player_death",
        &[("victim", "Bob"), ("zone", "Daymar"), ("killer", "Alice")],
    );
    let outcome = sink.deliver(&watched, "Alice killed Bob").await;
    assert_eq!(outcome, SinkOutcome::Delivered { attempts: 1 });
    sink.deliver(&event("player_death", &[("victim", "Carol"), ("killer", "Dave")]), "x")
        .await;

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(paths, vec!["/hook", "/technical", "/hook"]);

    let technical: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let line = technical["content"].as_str().unwrap();
    assert!(line.starts_with("player_death,"), "got: {line}");
    assert!(line.ends_with(",Bob,Daymar,Alice"), "got: {line}");
    assert_eq!(sink.state().snapshot().delivered, 2);
}

/// 저장소 행은 키 헤더와 식별 해시를 가진다
#[tokio::test]
async fn test_store_row_headers_and_table_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/kill_events"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(header("prefer", "return=minimal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = store_config(&server);
    config
        .table_map
        .insert("player_death".to_owned(), "kill_events".to_owned());
    let mut sink = StoreSink::new(config).unwrap();

    let e = event(
        "player_death",
        &[("killer", "Alice"), ("victim", "Bob"), ("timestamp", "2025-05-09T18:01:02.000Z")],
    );
    let outcome = sink.deliver(&e, &ctx()).await;
    assert_eq!(outcome, SinkOutcome::Delivered { attempts: 1 });

    let body = &bodies(&server).await[0];
    assert_eq!(body["username"], "ElKoukra");
    assert_eq!(body["killer"], "Alice");
    assert_eq!(body["hash_value"].as_str().unwrap().len(), 64);
}

/// 409는 이미 저장된 행으로 보고 성공 처리한다
#[tokio::test]
async fn test_store_conflict_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let mut sink = StoreSink::new(store_config(&server)).unwrap();
    let outcome = sink.deliver(&event("corpse", &[("player", "P")]), &ctx()).await;
    assert_eq!(outcome, SinkOutcome::Delivered { attempts: 1 });
    assert_eq!(bodies(&server).await.len(), 1);
}

/// 재시도 소진된 행은 버퍼에 보관되고 다음 성공 직후 순서대로 재전송된다
#[tokio::test]
async fn test_store_overflow_flushed_after_next_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let mut sink = StoreSink::new(store_config(&server)).unwrap();

    let first = sink.deliver(&event("corpse", &[("player", "first")]), &ctx()).await;
    assert_eq!(first, SinkOutcome::Buffered { pending: 1 });
    assert_eq!(sink.state().status(), SinkStatus::Backoff);

    let second = sink.deliver(&event("corpse", &[("player", "second")]), &ctx()).await;
    assert_eq!(second, SinkOutcome::Delivered { attempts: 1 });
    assert_eq!(sink.pending(), 0);

    let players: Vec<String> = bodies(&server)
        .await
        .iter()
        .map(|b| b["player"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(players, vec!["first", "first", "second", "first"]);
    let state = sink.state().snapshot();
    assert_eq!(state.delivered, 2);
    assert_eq!(state.status, SinkStatus::Connected);
}

/// 저장소가 거부한 행은 버퍼에 넣지 않는다
#[tokio::test]
async fn test_store_rejected_row_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let mut sink = StoreSink::new(store_config(&server)).unwrap();
    let outcome = sink.deliver(&event("corpse", &[]), &ctx()).await;
    assert_eq!(outcome, SinkOutcome::Dropped { reason: "rejected" });
    assert_eq!(sink.pending(), 0);
}
