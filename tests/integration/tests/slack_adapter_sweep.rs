use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;
use sweep_engine::{
    CallClass, CancellationSignal, Credential, DeleteFilters, EngineConfig, ExportOptions,
    RecordingClock, StreamStatus, SweepEngine, Target,
};
use sweep_slack::{SlackApiConfig, SlackWebApiClient};

fn unpaced_config() -> EngineConfig {
    let mut config = EngineConfig {
        export_stream_pause_ms: 0,
        delete_stream_pause_ms: 0,
        jitter: false,
        ..EngineConfig::default()
    };
    for class in [
        CallClass::Listing,
        CallClass::History,
        CallClass::Replies,
        CallClass::Lookup,
        CallClass::Mutation,
    ] {
        config.policy_mut(class).min_interval_ms = 0;
    }
    config
}

fn engine_for(server: &MockServer) -> (SweepEngine, Arc<RecordingClock>) {
    let api = SlackWebApiClient::new(&SlackApiConfig {
        api_base: server.base_url(),
        request_timeout_ms: 2_000,
        ..SlackApiConfig::default()
    })
    .expect("slack client");
    let clock = Arc::new(RecordingClock::new());
    let engine = SweepEngine::new(Arc::new(api), unpaced_config()).with_clock(clock.clone());
    (engine, clock)
}

fn mock_user(server: &MockServer, id: &str, real_name: &str) {
    let body = json!({
        "ok": true,
        "user": {"id": id, "name": id.to_lowercase(), "real_name": real_name}
    });
    let id = id.to_string();
    server.mock(move |when, then| {
        when.method(GET).path("/users.info").query_param("user", id);
        then.status(200).json_body(body);
    });
}

#[tokio::test]
async fn integration_channel_export_over_slack_api_nests_threads_in_order() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.info")
            .query_param("channel", "C1");
        then.status(200).json_body(json!({
            "ok": true,
            "channel": {"id": "C1", "name": "general"}
        }));
    });
    let history = server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.history")
            .query_param("channel", "C1");
        then.status(200).json_body(json!({
            "ok": true,
            "has_more": false,
            "messages": [
                {"ts": "3.000000", "user": "U1", "text": "third"},
                {"ts": "2.000000", "user": "U2", "text": "root", "thread_ts": "2.000000"},
                {"ts": "1.000000", "user": "U1", "text": "first"}
            ]
        }));
    });
    let replies = server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.replies")
            .query_param("channel", "C1")
            .query_param("ts", "2.000000");
        then.status(200).json_body(json!({
            "ok": true,
            "has_more": false,
            "messages": [
                {"ts": "2.000000", "user": "U2", "text": "root", "thread_ts": "2.000000"},
                {"ts": "2.100000", "user": "U1", "text": "r1", "thread_ts": "2.000000"},
                {"ts": "2.200000", "user": "U2", "text": "r2", "thread_ts": "2.000000"}
            ]
        }));
    });
    mock_user(&server, "U1", "Ada Lovelace");
    mock_user(&server, "U2", "Grace Hopper");

    let (engine, clock) = engine_for(&server);
    let result = engine
        .export_collection(
            &Credential::new("xoxp-test"),
            &Target::channel("C1"),
            &ExportOptions::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect("export");

    let ids = result
        .records
        .iter()
        .map(|record| record.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["1.000000", "2.000000", "3.000000"]);
    let root = &result.records[1];
    assert!(root.is_thread_root);
    assert_eq!(root.actor_name.as_deref(), Some("Grace Hopper"));
    let reply_ids = root
        .replies
        .iter()
        .map(|reply| reply.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(reply_ids, vec!["2.100000", "2.200000"]);
    assert_eq!(root.replies[0].actor_name.as_deref(), Some("Ada Lovelace"));
    assert!(result
        .records
        .iter()
        .all(|record| record.stream_name.as_deref() == Some("general")));
    assert!(result.is_complete());
    assert_eq!(history.calls(), 1);
    assert_eq!(replies.calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn integration_delete_in_stream_over_slack_api_counts_missing_messages_as_done() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.info")
            .query_param("channel", "C1");
        then.status(200).json_body(json!({
            "ok": true,
            "channel": {"id": "C1", "name": "general"}
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.history")
            .query_param("channel", "C1");
        then.status(200).json_body(json!({
            "ok": true,
            "has_more": false,
            "messages": [
                {"ts": "3.000000", "user": "U1", "text": "mine"},
                {"ts": "2.000000", "user": "U2", "text": "theirs"},
                {"ts": "1.000000", "user": "U1", "text": "mine too"}
            ]
        }));
    });
    let deleted = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.delete")
            .json_body(json!({"channel": "C1", "ts": "3.000000", "as_user": true}));
        then.status(200).json_body(json!({"ok": true}));
    });
    let gone = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.delete")
            .json_body(json!({"channel": "C1", "ts": "1.000000", "as_user": true}));
        then.status(200)
            .json_body(json!({"ok": false, "error": "message_not_found"}));
    });
    let untouched = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.delete")
            .json_body(json!({"channel": "C1", "ts": "2.000000", "as_user": true}));
        then.status(200).json_body(json!({"ok": true}));
    });

    let (engine, _clock) = engine_for(&server);
    let outcome = engine
        .delete_in_stream(
            &Credential::new("xoxp-test"),
            "C1",
            &DeleteFilters::for_actor("U1"),
            &CancellationSignal::new(),
        )
        .await
        .expect("delete");

    assert_eq!(outcome.stream_name, "general");
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.status, StreamStatus::Completed);
    assert_eq!(deleted.calls(), 1);
    assert_eq!(gone.calls(), 1);
    assert_eq!(untouched.calls(), 0);
}

#[tokio::test]
async fn integration_revoked_token_aborts_export_with_fatal_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/conversations.info");
        then.status(200)
            .json_body(json!({"ok": false, "error": "token_revoked"}));
    });
    let history = server.mock(|when, then| {
        when.method(GET).path("/conversations.history");
        then.status(200)
            .json_body(json!({"ok": true, "has_more": false, "messages": []}));
    });

    let (engine, _clock) = engine_for(&server);
    let error = engine
        .export_collection(
            &Credential::new("xoxp-revoked"),
            &Target::channel("C1"),
            &ExportOptions::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect_err("revoked token");

    assert!(
        matches!(error, sweep_engine::EngineError::Fatal { .. }),
        "{error:?}"
    );
    assert_eq!(history.calls(), 0);
}
