//! Top-level export and delete operations.

use std::sync::Arc;

use crate::actor_cache::actor_label;
use crate::aggregator::{merge, TruncationOrder};
use crate::cancel::CancellationSignal;
use crate::clock::{Clock, TokioClock};
use crate::collector::{collect_stream, CollectOptions, StreamRecords};
use crate::config::EngineConfig;
use crate::context::OperationContext;
use crate::error::EngineError;
use crate::mutation_executor::{delete_matching, run_deletes, DeleteFilters};
use crate::remote::{RemoteApi, StreamScope};
use crate::stream_resolver::{resolve_channel, resolve_shared_streams, resolve_streams};
use crate::types::{
    CollectionResult, Credential, MutationOutcome, MutationReport, StreamStatus, Target,
    TargetKind, TimeWindow,
};


/// Caller-supplied bounds for an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub window: TimeWindow,
    /// Cap on top-level records across all streams; the configured default when unset.
    pub limit: Option<usize>,
    /// Keep only records written by this actor, replies included.
    pub actor_filter: Option<String>,
}

/// Entry point for collection and deletion runs against one remote API.
///
/// Each call builds its own `OperationContext`, so concurrent calls share
/// nothing but the immutable configuration.
#[derive(Clone)]
pub struct SweepEngine {
    api: Arc<dyn RemoteApi>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
}

impl SweepEngine {
    pub fn new(api: Arc<dyn RemoteApi>, config: EngineConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
            clock: Arc::new(TokioClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn context(
        &self,
        credential: &Credential,
        cancel: &CancellationSignal,
    ) -> Result<OperationContext, EngineError> {
        if credential.is_empty() {
            return Err(EngineError::MissingCredential);
        }
        Ok(OperationContext::new(
            Arc::clone(&self.api),
            credential.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.clock),
            cancel.clone(),
        ))
    }

    /// Collects the records of a channel, or of every direct conversation of an actor.
    ///
    /// Channel exports fill the limit in stream order. Actor exports keep the
    /// most recent records across all conversations. Either way each stream's
    /// records are presented oldest first.
    pub async fn export_collection(
        &self,
        credential: &Credential,
        target: &Target,
        options: &ExportOptions,
        cancel: &CancellationSignal,
    ) -> Result<CollectionResult, EngineError> {
        let mut ctx = self.context(credential, cancel)?;
        let (scope, order) = match target.kind {
            TargetKind::Channel => (StreamScope::All, TruncationOrder::StreamOrder),
            TargetKind::Actor => (StreamScope::DirectOnly, TruncationOrder::MostRecentFirst),
        };
        tracing::info!(
            target_kind = target.kind.as_str(),
            target_id = %target.id,
            "export started"
        );
        let streams = resolve_streams(&mut ctx, target, scope).await?;
        if streams.is_empty() {
            tracing::info!(target_id = %target.id, "no streams to export");
            return Ok(CollectionResult::empty());
        }
        if target.kind == TargetKind::Actor {
            let actor_name = actor_label(&mut ctx, &target.id).await?;
            tracing::info!(
                target_id = %target.id,
                actor_name = %actor_name,
                streams = streams.len(),
                "exporting direct history"
            );
        }

        let limit = options.limit.unwrap_or(self.config.default_limit);
        let pause_ms = self.config.export_stream_pause_ms;
        let mut per_stream = Vec::with_capacity(streams.len());
        let mut kept = 0_usize;
        let mut cancelled = false;
        for (index, stream) in streams.iter().enumerate() {
            if cancelled {
                per_stream.push(StreamRecords::skipped(stream.clone(), StreamStatus::Cancelled));
                continue;
            }
            if order == TruncationOrder::StreamOrder && kept >= limit {
                per_stream.push(StreamRecords::skipped(
                    stream.clone(),
                    StreamStatus::LimitReached,
                ));
                continue;
            }
            if index > 0 && !ctx.pause_between_streams(pause_ms).await {
                cancelled = true;
                per_stream.push(StreamRecords::skipped(stream.clone(), StreamStatus::Cancelled));
                continue;
            }
            let budget = match order {
                TruncationOrder::StreamOrder => limit - kept,
                TruncationOrder::MostRecentFirst => limit,
            };
            let collect_options = CollectOptions {
                window: options.window.clone(),
                actor_filter: options.actor_filter.clone(),
                budget: Some(budget),
            };
            let collected = collect_stream(&mut ctx, stream, &collect_options).await?;
            cancelled = collected.status == StreamStatus::Cancelled;
            kept = kept.saturating_add(collected.records.len());
            per_stream.push(collected);
        }

        let result = merge(per_stream, Some(limit), order, cancelled);
        tracing::info!(
            target_id = %target.id,
            streams = result.streams.len(),
            records = result.total_records(),
            remote_calls = ctx.remote_calls(),
            complete = result.is_complete(),
            "export finished"
        );
        Ok(result)
    }

    /// Deletes the records of one stream that match `filters`.
    pub async fn delete_in_stream(
        &self,
        credential: &Credential,
        stream_id: &str,
        filters: &DeleteFilters,
        cancel: &CancellationSignal,
    ) -> Result<MutationOutcome, EngineError> {
        let mut ctx = self.context(credential, cancel)?;
        let stream_id = require_id("stream", stream_id)?;
        let stream = resolve_channel(&mut ctx, stream_id).await?;
        delete_matching(&mut ctx, &stream, filters).await
    }

    /// Deletes `actor_id`'s records from every conversation the actor belongs to.
    pub async fn delete_all_for_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
        filters: &DeleteFilters,
        cancel: &CancellationSignal,
    ) -> Result<MutationReport, EngineError> {
        self.delete_for_actor(credential, actor_id, StreamScope::All, filters, cancel)
            .await
    }

    /// Deletes `actor_id`'s records from their direct and group-direct conversations.
    pub async fn delete_direct_history(
        &self,
        credential: &Credential,
        actor_id: &str,
        filters: &DeleteFilters,
        cancel: &CancellationSignal,
    ) -> Result<MutationReport, EngineError> {
        self.delete_for_actor(credential, actor_id, StreamScope::DirectOnly, filters, cancel)
            .await
    }

    async fn delete_for_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
        scope: StreamScope,
        filters: &DeleteFilters,
        cancel: &CancellationSignal,
    ) -> Result<MutationReport, EngineError> {
        let mut ctx = self.context(credential, cancel)?;
        let actor_id = require_id("actor", actor_id)?;
        let streams = resolve_streams(&mut ctx, &Target::actor(actor_id), scope).await?;
        tracing::info!(
            actor_id,
            scope = scope.as_str(),
            streams = streams.len(),
            "delete run started"
        );
        let filters = DeleteFilters {
            actor_id: Some(actor_id.to_string()),
            ..filters.clone()
        };
        run_deletes(&mut ctx, &streams, &filters).await
    }

    /// Deletes `actor_id`'s records from conversations shared with `other_actor_id`.
    pub async fn delete_between_actors(
        &self,
        credential: &Credential,
        actor_id: &str,
        other_actor_id: &str,
        filters: &DeleteFilters,
        cancel: &CancellationSignal,
    ) -> Result<MutationReport, EngineError> {
        let mut ctx = self.context(credential, cancel)?;
        let actor_id = require_id("actor", actor_id)?;
        let other_actor_id = require_id("other actor", other_actor_id)?;
        let streams = resolve_shared_streams(&mut ctx, actor_id, other_actor_id).await?;
        tracing::info!(
            actor_id,
            other_actor_id,
            streams = streams.len(),
            "delete run started"
        );
        let filters = DeleteFilters {
            actor_id: Some(actor_id.to_string()),
            ..filters.clone()
        };
        run_deletes(&mut ctx, &streams, &filters).await
    }
}

fn require_id<'a>(label: &str, id: &'a str) -> Result<&'a str, EngineError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(EngineError::InvalidTarget(format!(
            "{label} id must not be empty"
        )));
    }
    Ok(id)
}
