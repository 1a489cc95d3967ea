//! Turns targets into concrete, named streams.

use std::collections::HashSet;

use crate::actor_cache::actor_label;
use crate::config::CallClass;
use crate::context::OperationContext;
use crate::error::{ClassifiedError, EngineError, ErrorClass};
use crate::paginator::{ActorStreamsSource, MembersSource, PageEnd, Paginator};
use crate::remote::{StreamInfo, StreamScope};
use crate::types::{Stream, StreamKind, Target, TargetKind, TimeWindow};

pub async fn resolve_streams(
    ctx: &mut OperationContext,
    target: &Target,
    scope: StreamScope,
) -> Result<Vec<Stream>, EngineError> {
    let id = target.id.trim();
    if id.is_empty() {
        return Err(EngineError::InvalidTarget(format!(
            "{} id must not be empty",
            target.kind.as_str()
        )));
    }
    match target.kind {
        TargetKind::Channel => Ok(vec![resolve_channel(ctx, id).await?]),
        TargetKind::Actor => Ok(list_actor_streams(ctx, id, scope).await?),
    }
}

/// Looks up one stream by id, naming direct conversations after the other party.
///
/// When the info lookup yields nothing the stream is treated as a direct
/// conversation and named after the author of its latest record.
pub async fn resolve_channel(
    ctx: &mut OperationContext,
    stream_id: &str,
) -> Result<Stream, ClassifiedError> {
    let result = ctx
        .call(
            CallClass::Lookup,
            "conversations.info",
            move |api, credential| async move { api.get_stream_info(&credential, stream_id).await },
        )
        .await;
    match result {
        Ok(Some(info)) => stream_from_info(ctx, info).await,
        Ok(None) => direct_fallback(ctx, stream_id).await,
        Err(error) if error.class == ErrorClass::Fatal => Err(error),
        Err(error) => {
            tracing::warn!(
                stream_id,
                class = %error.class,
                "stream info unavailable; falling back to direct naming"
            );
            direct_fallback(ctx, stream_id).await
        }
    }
}

async fn stream_from_info(
    ctx: &mut OperationContext,
    info: StreamInfo,
) -> Result<Stream, ClassifiedError> {
    if let Some(name) = info.name.filter(|name| !name.trim().is_empty()) {
        return Ok(Stream {
            id: info.id,
            display_name: name,
            kind: info.kind,
            counterpart_actor_id: info.counterpart_actor_id,
        });
    }
    match info.counterpart_actor_id {
        Some(counterpart) => {
            let name = actor_label(ctx, &counterpart).await?;
            Ok(Stream {
                id: info.id,
                display_name: format!("DM-{name}"),
                kind: info.kind,
                counterpart_actor_id: Some(counterpart),
            })
        }
        None => direct_fallback(ctx, &info.id).await,
    }
}

async fn direct_fallback(
    ctx: &mut OperationContext,
    stream_id: &str,
) -> Result<Stream, ClassifiedError> {
    let unbounded = TimeWindow::unbounded();
    let window = &unbounded;
    let latest = ctx
        .call(
            CallClass::History,
            "conversations.history",
            move |api, credential| async move {
                api.fetch_history(&credential, stream_id, None, window, 1)
                    .await
            },
        )
        .await;
    let author = match latest {
        Ok(page) => page
            .items
            .into_iter()
            .next()
            .map(|record| record.actor_id)
            .filter(|actor_id| !actor_id.is_empty()),
        Err(error) if error.class == ErrorClass::Fatal => return Err(error),
        Err(error) => {
            tracing::warn!(stream_id, class = %error.class, "latest record unavailable");
            None
        }
    };
    let display_name = match &author {
        Some(actor_id) => format!("DM-{}", actor_label(ctx, actor_id).await?),
        None => format!("DM-unknown-{stream_id}"),
    };
    Ok(Stream {
        id: stream_id.to_string(),
        display_name,
        kind: StreamKind::Direct,
        counterpart_actor_id: author,
    })
}

/// Every stream `actor_id` belongs to within `scope`, in remote order.
///
/// A listing that fails part-way returns the streams discovered so far.
pub async fn list_actor_streams(
    ctx: &mut OperationContext,
    actor_id: &str,
    scope: StreamScope,
) -> Result<Vec<Stream>, ClassifiedError> {
    let source = ActorStreamsSource {
        actor_id: actor_id.to_string(),
        scope,
        page_size: ctx.config().listing_page_size,
    };
    let collected = Paginator::new(source).collect(ctx, |_| true).await?;
    if let PageEnd::Skipped(reason) | PageEnd::Failed(reason) = &collected.end {
        tracing::warn!(
            actor_id,
            scope = scope.as_str(),
            reason = %reason,
            discovered = collected.items.len(),
            "stream listing ended early; continuing with partial list"
        );
    }

    let mut seen = HashSet::new();
    let mut streams = Vec::new();
    for stream in collected.items {
        if !seen.insert(stream.id.clone()) {
            continue;
        }
        streams.push(name_stream(ctx, stream).await?);
    }
    tracing::debug!(actor_id, streams = streams.len(), "actor streams listed");
    Ok(streams)
}

async fn name_stream(
    ctx: &mut OperationContext,
    mut stream: Stream,
) -> Result<Stream, ClassifiedError> {
    if !stream.display_name.trim().is_empty() {
        return Ok(stream);
    }
    stream.display_name = match stream.counterpart_actor_id.clone() {
        Some(counterpart) if stream.kind == StreamKind::Direct => {
            format!("DM-{}", actor_label(ctx, &counterpart).await?)
        }
        _ => format!("channel-{}", stream.id),
    };
    Ok(stream)
}

/// Direct and group-direct streams shared by `actor_id` and `other_actor_id`.
///
/// Discovery is always scoped to `actor_id`'s own conversations.
pub async fn resolve_shared_streams(
    ctx: &mut OperationContext,
    actor_id: &str,
    other_actor_id: &str,
) -> Result<Vec<Stream>, ClassifiedError> {
    let mut shared = Vec::new();
    let mut seen = HashSet::new();

    let opened = ctx
        .call(
            CallClass::Lookup,
            "conversations.open",
            move |api, credential| async move {
                api.open_direct_stream(&credential, other_actor_id).await
            },
        )
        .await;
    match opened {
        Ok(stream_id) => {
            let stream = resolve_channel(ctx, &stream_id).await?;
            seen.insert(stream.id.clone());
            shared.push(stream);
        }
        Err(error) if error.class == ErrorClass::Fatal => return Err(error),
        Err(error) => {
            tracing::warn!(
                other_actor_id,
                class = %error.class,
                "direct stream could not be opened"
            );
        }
    }

    for stream in list_actor_streams(ctx, actor_id, StreamScope::DirectOnly).await? {
        if seen.contains(&stream.id) {
            continue;
        }
        let include = match stream.kind {
            StreamKind::Direct => stream.counterpart_actor_id.as_deref() == Some(other_actor_id),
            StreamKind::GroupDirect => has_member(ctx, &stream, other_actor_id).await?,
            StreamKind::Channel => false,
        };
        if include {
            seen.insert(stream.id.clone());
            shared.push(stream);
        }
    }
    Ok(shared)
}

async fn has_member(
    ctx: &mut OperationContext,
    stream: &Stream,
    actor_id: &str,
) -> Result<bool, ClassifiedError> {
    let source = MembersSource {
        stream_id: stream.id.clone(),
        page_size: ctx.config().listing_page_size,
    };
    let collected = Paginator::new(source).collect(ctx, |_| true).await?;
    let found = collected.items.iter().any(|member| member == actor_id);
    match collected.end {
        PageEnd::Skipped(reason) | PageEnd::Failed(reason) if !found => {
            tracing::warn!(
                stream_id = %stream.id,
                reason = %reason,
                "member listing failed; skipping stream"
            );
            Ok(false)
        }
        _ => Ok(found),
    }
}
