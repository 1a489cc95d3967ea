use std::collections::HashSet;

use crate::actor_cache::resolve_actor;
use crate::context::OperationContext;
use crate::error::{ClassifiedError, ErrorClass};
use crate::paginator::{PageEnd, Paginator, RepliesSource};
use crate::types::{sort_chronologically, Record};

/// Fetches every reply under `root_id`, oldest first.
///
/// The root itself is dropped from the result wherever the remote repeats it.
/// A skipped or failed thread yields an empty list so the caller keeps its root.
/// Cancellation comes back as an `Err` of class `Cancelled`, never as a partial list.
pub async fn expand_thread(
    ctx: &mut OperationContext,
    stream_id: &str,
    root_id: &str,
    actor_filter: Option<&str>,
) -> Result<Vec<Record>, ClassifiedError> {
    let source = RepliesSource {
        stream_id: stream_id.to_string(),
        root_id: root_id.to_string(),
        page_size: ctx.config().replies_page_size,
    };
    let collected = Paginator::new(source).collect(ctx, |_| true).await?;
    match &collected.end {
        PageEnd::Skipped(reason) | PageEnd::Failed(reason) => {
            tracing::warn!(stream_id, root_id, reason = %reason, "thread replies unavailable");
            return Ok(Vec::new());
        }
        PageEnd::Cancelled => {
            tracing::debug!(stream_id, root_id, "thread expansion cancelled");
            return Err(ClassifiedError::cancelled("conversations.replies", 0));
        }
        PageEnd::Exhausted | PageEnd::Stopped => {}
    }

    let mut seen = HashSet::new();
    let mut replies = Vec::new();
    for mut reply in collected.items {
        if reply.id == root_id || !seen.insert(reply.id.clone()) {
            continue;
        }
        if actor_filter.is_some_and(|actor_id| reply.actor_id != actor_id) {
            continue;
        }
        reply.is_thread_root = false;
        reply.replies.clear();
        reply.thread_root_id = Some(root_id.to_string());
        reply.stream_id = stream_id.to_string();
        replies.push(reply);
    }

    for reply in &mut replies {
        match resolve_actor(ctx, &reply.actor_id).await {
            Ok(actor) => reply.actor_name = Some(actor.display_name),
            Err(error) if matches!(error.class, ErrorClass::Fatal | ErrorClass::Cancelled) => {
                return Err(error)
            }
            Err(_) => {}
        }
    }
    sort_chronologically(&mut replies);
    Ok(replies)
}
