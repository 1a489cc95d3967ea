use std::sync::Arc;
use std::time::Duration;

use sweep_engine::testing::{FakeMethod, FakeRemoteApi};
use sweep_engine::{
    CallClass, CancellationSignal, Credential, DeleteFilters, EngineConfig, ExportOptions,
    Record, RecordingClock, RemoteError, StreamStatus, SweepEngine, Target,
};

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

fn engine_for(api: &Arc<FakeRemoteApi>) -> (SweepEngine, Arc<RecordingClock>) {
    let clock = Arc::new(RecordingClock::new());
    let engine = SweepEngine::new(api.clone(), unpaced_config()).with_clock(clock.clone());
    (engine, clock)
}

fn credential() -> Credential {
    Credential::new("xoxp-test")
}

/// U1 (Ada) shares D1 with U2 (Grace), G1 with U2 and U3, G2 with U3 only,
/// and posts in channel C9.
fn shared_workspace() -> Arc<FakeRemoteApi> {
    let api = Arc::new(FakeRemoteApi::new());
    api.require_credential("xoxp-test");
    api.add_actor("U1", "Ada", Some("ada@example.com"));
    api.add_actor("U2", "Grace", None);
    api.add_actor("U3", "Linus", None);
    api.add_direct("D1", "U2");
    api.add_group_direct("G1", "mpdm-ada--grace--linus-1", &["U1", "U2", "U3"]);
    api.add_group_direct("G2", "mpdm-ada--linus-1", &["U1", "U3"]);
    api.add_channel("C9", "general");
    for stream_id in ["D1", "G1", "G2", "C9"] {
        api.add_membership("U1", stream_id);
    }
    api.set_direct_stream("U2", "D1");

    api.push_record(Record::new("D1", "10.000000", "U1", "hi grace"));
    api.push_record(Record::new("D1", "11.000000", "U2", "hi ada"));
    api.push_record(Record::new("D1", "12.000000", "U1", "lunch?"));
    api.push_record(Record::new("G1", "20.000000", "U3", "standup"));
    api.push_record(Record::new("G1", "21.000000", "U1", "done"));
    api.push_record(Record::new("G2", "30.000000", "U1", "private note"));
    api.push_record(Record::new("C9", "40.000000", "U1", "announcement"));
    api
}

fn stream_ids<'a>(records: &'a [Record], stream_id: &str) -> Vec<&'a str> {
    records
        .iter()
        .filter(|record| record.stream_id == stream_id)
        .map(|record| record.id.as_str())
        .collect()
}

#[tokio::test]
async fn integration_actor_export_covers_direct_streams_and_recovers_from_rate_limits() {
    let api = shared_workspace();
    api.fail_times(
        FakeMethod::History,
        "D1",
        RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        },
        2,
    );
    let (engine, clock) = engine_for(&api);

    let result = engine
        .export_collection(
            &credential(),
            &Target::actor("U1"),
            &ExportOptions::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect("export");

    assert_eq!(
        stream_ids(&result.records, "D1"),
        vec!["10.000000", "11.000000", "12.000000"]
    );
    assert_eq!(stream_ids(&result.records, "G1"), vec!["20.000000", "21.000000"]);
    assert_eq!(stream_ids(&result.records, "G2"), vec!["30.000000"]);
    assert!(stream_ids(&result.records, "C9").is_empty());
    let direct = result
        .records
        .iter()
        .find(|record| record.stream_id == "D1")
        .expect("direct record");
    assert_eq!(direct.stream_name.as_deref(), Some("DM-Grace"));
    assert!(result.is_complete());
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(3_000), Duration::from_millis(4_000)]
    );
    assert_eq!(api.calls_for(FakeMethod::History, "D1"), 3);
}

#[tokio::test]
async fn integration_delete_between_actors_is_idempotent_and_leaves_others_untouched() {
    let api = shared_workspace();
    let (engine, _clock) = engine_for(&api);

    let first = engine
        .delete_between_actors(
            &credential(),
            "U1",
            "U2",
            &DeleteFilters::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect("first pass");

    let touched = first
        .outcomes
        .iter()
        .map(|outcome| outcome.stream_id.as_str())
        .collect::<Vec<_>>();
    assert!(touched.contains(&"D1") && touched.contains(&"G1"), "{touched:?}");
    assert!(!touched.contains(&"G2"));
    assert_eq!(first.total_succeeded(), 3);
    assert_eq!(first.total_failed(), 0);
    assert!(first.is_complete());
    assert_eq!(api.remaining_record_ids("D1"), vec!["11.000000"]);
    assert_eq!(api.remaining_record_ids("G1"), vec!["20.000000"]);
    assert_eq!(api.remaining_record_ids("G2"), vec!["30.000000"]);

    let second = engine
        .delete_between_actors(
            &credential(),
            "U1",
            "U2",
            &DeleteFilters::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect("second pass");
    assert_eq!(second.total_succeeded(), 0);
    assert_eq!(second.total_failed(), 0);
    assert_eq!(api.remaining_record_ids("D1"), vec!["11.000000"]);
}

#[tokio::test]
async fn integration_delete_all_skips_inaccessible_stream_and_finishes_the_rest() {
    let api = shared_workspace();
    api.fail_times(
        FakeMethod::History,
        "G1",
        RemoteError::Inaccessible {
            code: "not_in_channel".to_string(),
        },
        1,
    );
    let (engine, _clock) = engine_for(&api);

    let report = engine
        .delete_all_for_actor(
            &credential(),
            "U1",
            &DeleteFilters::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect("delete run");

    let skipped = report
        .outcomes
        .iter()
        .find(|outcome| outcome.stream_id == "G1")
        .expect("G1 outcome");
    assert!(matches!(skipped.status, StreamStatus::Skipped { .. }));
    assert_eq!(skipped.attempted(), 0);
    assert!(!report.is_complete());
    assert_eq!(report.total_succeeded(), 4);
    assert_eq!(api.remaining_record_ids("C9"), Vec::<String>::new());
    assert_eq!(api.remaining_record_ids("G1"), vec!["20.000000", "21.000000"]);
    assert_eq!(api.call_count(FakeMethod::Delete), 4);
}

#[tokio::test]
async fn regression_wrong_credential_fails_before_any_delete() {
    let api = shared_workspace();
    let (engine, _clock) = engine_for(&api);

    let error = engine
        .delete_direct_history(
            &Credential::new("xoxp-other"),
            "U1",
            &DeleteFilters::default(),
            &CancellationSignal::new(),
        )
        .await
        .expect_err("fatal credential");

    assert!(
        matches!(error, sweep_engine::EngineError::Fatal { .. }),
        "{error:?}"
    );
    assert_eq!(api.call_count(FakeMethod::Delete), 0);
}
