//! Reads one stream's history into stamped, thread-expanded records.

use std::collections::HashSet;

use crate::actor_cache::resolve_actor;
use crate::context::OperationContext;
use crate::error::{ClassifiedError, ErrorClass};
use crate::paginator::{HistorySource, PageEnd, Paginator};
use crate::thread_expander::expand_thread;
use crate::types::{sort_chronologically, Record, Stream, StreamStatus, TimeWindow};

#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub window: TimeWindow,
    /// Keep only records (and replies) written by this actor.
    pub actor_filter: Option<String>,
    /// Maximum number of top-level records to keep from this stream.
    pub budget: Option<usize>,
}

/// Records gathered from one stream and how the read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecords {
    pub stream: Stream,
    pub records: Vec<Record>,
    pub status: StreamStatus,
}

impl StreamRecords {
    pub fn skipped(stream: Stream, status: StreamStatus) -> Self {
        Self {
            stream,
            records: Vec::new(),
            status,
        }
    }
}

/// Collects the top-level records of `stream`, oldest first.
///
/// Thread roots get their replies attached before the next record is read. Once
/// `budget` records are kept no further history page is requested. Only `Fatal`
/// errors are returned as `Err`.
pub async fn collect_stream(
    ctx: &mut OperationContext,
    stream: &Stream,
    options: &CollectOptions,
) -> Result<StreamRecords, ClassifiedError> {
    let mut paginator = Paginator::new(HistorySource {
        stream_id: stream.id.clone(),
        window: options.window.clone(),
        page_size: ctx.config().history_page_size,
    });
    let budget_met = |count: usize| options.budget.is_some_and(|budget| count >= budget);
    let actor_filter = options.actor_filter.as_deref();

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let mut truncated = false;
    let end = loop {
        if budget_met(records.len()) {
            break if paginator.is_exhausted() && !truncated {
                PageEnd::Exhausted
            } else {
                PageEnd::Stopped
            };
        }
        let page = match paginator.next_page(ctx).await {
            Ok(Some(page)) => page,
            Ok(None) => break PageEnd::Exhausted,
            Err(error) => break PageEnd::from_error(error)?,
        };
        let mut interrupted = false;
        for record in page {
            if budget_met(records.len()) {
                truncated = true;
                break;
            }
            if ctx.is_interrupted() {
                interrupted = true;
                break;
            }
            if !seen.insert(record.id.clone()) || !options.window.contains(&record) {
                continue;
            }
            if actor_filter.is_some_and(|actor_id| record.actor_id != actor_id) {
                continue;
            }
            match finish_record(ctx, stream, record, actor_filter).await? {
                Some(record) => records.push(record),
                None => {
                    interrupted = true;
                    break;
                }
            }
        }
        if interrupted {
            break PageEnd::Cancelled;
        }
    };

    sort_chronologically(&mut records);
    let status = end.into_status();
    tracing::debug!(
        stream_id = %stream.id,
        records = records.len(),
        pages = paginator.pages(),
        status = ?status,
        "stream collected"
    );
    Ok(StreamRecords {
        stream: stream.clone(),
        records,
        status,
    })
}

/// Stamps, names and expands one record. `None` means the operation was
/// interrupted before the record was complete; it is dropped, not kept half-built.
async fn finish_record(
    ctx: &mut OperationContext,
    stream: &Stream,
    mut record: Record,
    actor_filter: Option<&str>,
) -> Result<Option<Record>, ClassifiedError> {
    record.stream_id = stream.id.clone();
    record.stream_name = Some(stream.display_name.clone());
    record.actor_name = match resolve_actor(ctx, &record.actor_id).await {
        Ok(actor) => Some(actor.display_name),
        Err(error) if error.class == ErrorClass::Cancelled => return Ok(None),
        Err(error) => return Err(error),
    };
    if record.is_thread_root {
        let mut replies = match expand_thread(ctx, &stream.id, &record.id, actor_filter).await {
            Ok(replies) => replies,
            Err(error) if error.class == ErrorClass::Cancelled => return Ok(None),
            Err(error) => return Err(error),
        };
        for reply in &mut replies {
            reply.stream_name = Some(stream.display_name.clone());
        }
        record.replies = replies;
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::EngineConfig;
    use crate::remote::RemoteError;
    use crate::testing::{context_for, FakeMethod, FakeRemoteApi};

    fn general() -> Stream {
        Stream {
            id: "C1".to_string(),
            display_name: "general".to_string(),
            kind: crate::types::StreamKind::Channel,
            counterpart_actor_id: None,
        }
    }

    fn seeded(count: usize) -> Arc<FakeRemoteApi> {
        let api = Arc::new(FakeRemoteApi::new());
        api.add_channel("C1", "general");
        api.add_actor("U1", "Ada", None);
        for index in 0..count {
            api.push_record(Record::new(
                "C1",
                format!("{}.000000", 1_000 + index),
                "U1",
                format!("m{index}"),
            ));
        }
        api
    }

    #[tokio::test]
    async fn functional_collect_stream_stamps_and_orders_records() {
        let api = seeded(5);
        let config = EngineConfig {
            history_page_size: 2,
            ..EngineConfig::default()
        };
        let (mut ctx, _clock) = context_for(&api, config);
        let collected = collect_stream(&mut ctx, &general(), &CollectOptions::default())
            .await
            .expect("collect");
        assert_eq!(collected.status, StreamStatus::Completed);
        let ids = collected
            .records
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec!["1000.000000", "1001.000000", "1002.000000", "1003.000000", "1004.000000"]
        );
        assert!(collected.records.iter().all(|r| {
            r.stream_name.as_deref() == Some("general") && r.actor_name.as_deref() == Some("Ada")
        }));
        assert_eq!(api.call_count(FakeMethod::GetActor), 1);
    }

    #[tokio::test]
    async fn functional_budget_stops_without_requesting_another_page() {
        let api = seeded(100);
        let config = EngineConfig {
            history_page_size: 20,
            ..EngineConfig::default()
        };
        let (mut ctx, _clock) = context_for(&api, config);
        let options = CollectOptions {
            budget: Some(20),
            ..CollectOptions::default()
        };
        let collected = collect_stream(&mut ctx, &general(), &options)
            .await
            .expect("collect");
        assert_eq!(collected.records.len(), 20);
        assert_eq!(collected.status, StreamStatus::LimitReached);
        assert_eq!(api.call_count(FakeMethod::History), 1);
        // Newest page first, returned oldest first.
        assert_eq!(collected.records[0].id, "1080.000000");
        assert_eq!(collected.records[19].id, "1099.000000");
    }

    #[tokio::test]
    async fn functional_thread_roots_carry_their_replies() {
        let api = seeded(0);
        api.add_actor("U2", "Grace", None);
        api.push_record(Record::new("C1", "1.000000", "U1", "root").in_thread("1.000000"));
        api.push_record(Record::new("C1", "5.000000", "U2", "plain"));
        api.push_reply("1.000000", Record::new("C1", "2.000000", "U2", "r1"));
        api.push_reply("1.000000", Record::new("C1", "3.000000", "U1", "r2"));
        let (mut ctx, _clock) = context_for(&api, EngineConfig::default());
        let collected = collect_stream(&mut ctx, &general(), &CollectOptions::default())
            .await
            .expect("collect");
        assert_eq!(collected.records.len(), 2);
        let root = &collected.records[0];
        assert!(root.is_thread_root);
        assert_eq!(root.replies.len(), 2);
        assert_eq!(root.replies[1].stream_name.as_deref(), Some("general"));
        assert!(collected.records[1].replies.is_empty());
    }

    #[tokio::test]
    async fn unit_inaccessible_stream_is_skipped_not_failed() {
        let api = seeded(3);
        api.fail_times(
            FakeMethod::History,
            "C1",
            RemoteError::Inaccessible {
                code: "not_in_channel".to_string(),
            },
            1,
        );
        let (mut ctx, _clock) = context_for(&api, EngineConfig::default());
        let collected = collect_stream(&mut ctx, &general(), &CollectOptions::default())
            .await
            .expect("skip is not an error");
        assert!(matches!(collected.status, StreamStatus::Skipped { .. }));
        assert!(collected.records.is_empty());
    }

    #[tokio::test]
    async fn regression_fatal_lookup_aborts_collection() {
        let api = seeded(1);
        api.fail_times(
            FakeMethod::GetActor,
            "U1",
            RemoteError::Unauthorized {
                code: "token_revoked".to_string(),
            },
            1,
        );
        let (mut ctx, _clock) = context_for(&api, EngineConfig::default());
        let error = collect_stream(&mut ctx, &general(), &CollectOptions::default())
            .await
            .expect_err("fatal propagates");
        assert_eq!(error.class, ErrorClass::Fatal);
    }
}
