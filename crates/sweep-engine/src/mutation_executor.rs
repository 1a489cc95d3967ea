//! Deletes matching records stream by stream and tallies the outcome.

use std::collections::HashSet;

use crate::config::CallClass;
use crate::context::OperationContext;
use crate::error::{EngineError, ErrorClass};
use crate::paginator::{HistorySource, PageEnd, Paginator};
use crate::remote::DeleteAck;
use crate::thread_expander::expand_thread;
use crate::types::{MutationOutcome, MutationReport, Record, Stream, StreamStatus, TimeWindow};

/// Which records a delete pass removes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteFilters {
    /// Only records written by this actor.
    pub actor_id: Option<String>,
    pub window: TimeWindow,
    /// Per-stream cap on attempted deletes; falls back to the configured default.
    pub limit: Option<usize>,
    /// Also delete matching replies under each matching thread root.
    pub include_thread_replies: bool,
}

impl DeleteFilters {
    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.window.contains(record) {
            return false;
        }
        match &self.actor_id {
            Some(actor_id) => &record.actor_id == actor_id,
            None => true,
        }
    }
}

enum Step {
    Continue,
    Stop(StreamStatus),
}

/// Deletes every record in `stream` that matches `filters`, newest first.
///
/// Records already gone count as succeeded. A per-record failure is tallied
/// and the pass moves on; an inaccessible stream ends as `Skipped`. At most
/// `limit` deletes are attempted; no history page is read past that point.
pub async fn delete_matching(
    ctx: &mut OperationContext,
    stream: &Stream,
    filters: &DeleteFilters,
) -> Result<MutationOutcome, EngineError> {
    let limit = filters.limit.unwrap_or(ctx.config().default_limit);
    let mut outcome = MutationOutcome::new(stream);
    let mut paginator = Paginator::new(HistorySource {
        stream_id: stream.id.clone(),
        window: filters.window.clone(),
        page_size: ctx.config().history_page_size,
    });
    let mut seen = HashSet::new();
    let mut truncated = false;

    let status = 'stream: loop {
        if outcome.attempted() >= limit as u64 {
            break if paginator.is_exhausted() && !truncated {
                StreamStatus::Completed
            } else {
                StreamStatus::LimitReached
            };
        }
        let page = match paginator.next_page(ctx).await {
            Ok(Some(page)) => page,
            Ok(None) => break StreamStatus::Completed,
            Err(error) => break PageEnd::from_error(error)?.into_status(),
        };

        for record in page {
            if outcome.attempted() >= limit as u64 {
                truncated = true;
                break;
            }
            if ctx.is_interrupted() {
                break 'stream StreamStatus::Cancelled;
            }
            if !seen.insert(record.id.clone()) || !filters.matches(&record) {
                continue;
            }
            if filters.include_thread_replies && record.is_thread_root {
                let replies = match expand_thread(
                    ctx,
                    &stream.id,
                    &record.id,
                    filters.actor_id.as_deref(),
                )
                .await
                {
                    Ok(replies) => replies,
                    Err(error) if error.class == ErrorClass::Cancelled => {
                        break 'stream StreamStatus::Cancelled;
                    }
                    Err(error) => return Err(error.into()),
                };
                for reply in replies.iter().rev() {
                    if outcome.attempted() >= limit as u64 {
                        truncated = true;
                        break;
                    }
                    if !seen.insert(reply.id.clone()) || !filters.window.contains(reply) {
                        continue;
                    }
                    if let Step::Stop(status) =
                        delete_one(ctx, &stream.id, &reply.id, &mut outcome).await?
                    {
                        break 'stream status;
                    }
                }
                if truncated {
                    continue;
                }
            }
            if let Step::Stop(status) =
                delete_one(ctx, &stream.id, &record.id, &mut outcome).await?
            {
                break 'stream status;
            }
        }
    };

    outcome.status = status;
    tracing::info!(
        stream_id = %stream.id,
        stream_name = %stream.display_name,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        status = ?outcome.status,
        "stream delete pass finished"
    );
    Ok(outcome)
}

async fn delete_one(
    ctx: &mut OperationContext,
    stream_id: &str,
    record_id: &str,
    outcome: &mut MutationOutcome,
) -> Result<Step, EngineError> {
    let result = ctx
        .call(
            CallClass::Mutation,
            "chat.delete",
            move |api, credential| async move {
                api.delete_record(&credential, stream_id, record_id).await
            },
        )
        .await;
    match result {
        Ok(DeleteAck::Deleted) => outcome.succeeded += 1,
        Ok(DeleteAck::AlreadyGone) => {
            tracing::debug!(stream_id, record_id, "record already gone");
            outcome.succeeded += 1;
        }
        Err(error) => match error.class {
            ErrorClass::AlreadySatisfied => outcome.succeeded += 1,
            ErrorClass::Fatal => return Err(error.into()),
            ErrorClass::Cancelled => return Ok(Step::Stop(StreamStatus::Cancelled)),
            ErrorClass::SkipStream => {
                return Ok(Step::Stop(StreamStatus::Skipped {
                    reason: error.message,
                }))
            }
            ErrorClass::RateLimited | ErrorClass::Transient | ErrorClass::StreamFailure => {
                tracing::warn!(
                    stream_id,
                    record_id,
                    attempts = error.attempts,
                    error = %error.message,
                    "delete failed"
                );
                outcome.failed += 1;
            }
        },
    }
    Ok(Step::Continue)
}

/// Runs `delete_matching` over `streams` in order, pausing between them.
///
/// Every stream appears in the report; streams not reached before a
/// cancellation are reported as `Cancelled` with zero counts.
pub async fn run_deletes(
    ctx: &mut OperationContext,
    streams: &[Stream],
    filters: &DeleteFilters,
) -> Result<MutationReport, EngineError> {
    let mut report = MutationReport::default();
    let pause_ms = ctx.config().delete_stream_pause_ms;
    for (index, stream) in streams.iter().enumerate() {
        let proceed = !report.cancelled
            && (index == 0 || ctx.pause_between_streams(pause_ms).await)
            && !ctx.is_interrupted();
        if !proceed {
            report.cancelled = true;
            let mut outcome = MutationOutcome::new(stream);
            outcome.status = StreamStatus::Cancelled;
            report.outcomes.push(outcome);
            continue;
        }
        let outcome = delete_matching(ctx, stream, filters).await?;
        if outcome.status == StreamStatus::Cancelled {
            report.cancelled = true;
        }
        report.outcomes.push(outcome);
    }
    tracing::info!(
        streams = report.outcomes.len(),
        succeeded = report.total_succeeded(),
        failed = report.total_failed(),
        cancelled = report.cancelled,
        "delete run finished"
    );
    Ok(report)
}
