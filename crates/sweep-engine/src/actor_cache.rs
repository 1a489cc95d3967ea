//! Per-operation memo of actor lookups, including failed ones.

use std::collections::HashMap;

use crate::config::CallClass;
use crate::context::OperationContext;
use crate::error::{ClassifiedError, ErrorClass};
use crate::types::Actor;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CachedActor {
    Resolved(Actor),
    Fallback(Actor),
}

impl CachedActor {
    fn actor(&self) -> &Actor {
        match self {
            Self::Resolved(actor) | Self::Fallback(actor) => actor,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ActorCache {
    entries: HashMap<String, CachedActor>,
}

impl ActorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor_id: &str) -> Option<&Actor> {
        self.entries.get(actor_id).map(CachedActor::actor)
    }

    /// Entries are write-once: an existing entry is kept and returned.
    fn insert_once(&mut self, actor_id: &str, entry: CachedActor) -> Actor {
        self.entries
            .entry(actor_id.to_string())
            .or_insert(entry)
            .actor()
            .clone()
    }
}

/// Resolves `actor_id`, issuing at most one remote lookup per id per operation.
///
/// Failures other than `Fatal` and `Cancelled` are cached as an `unknown-<id>`
/// fallback. Those two propagate and leave the cache untouched.
pub async fn resolve_actor(
    ctx: &mut OperationContext,
    actor_id: &str,
) -> Result<Actor, ClassifiedError> {
    let actor_id = actor_id.trim();
    if actor_id.is_empty() {
        return Ok(Actor {
            id: String::new(),
            display_name: "unknown".to_string(),
            contact_email: None,
        });
    }
    if let Some(actor) = ctx.actors.get(actor_id) {
        return Ok(actor.clone());
    }

    let result = ctx
        .call(
            CallClass::Lookup,
            "users.info",
            move |api, credential| async move { api.get_actor(&credential, actor_id).await },
        )
        .await;

    let entry = match result {
        Ok(Some(actor)) => CachedActor::Resolved(actor),
        Ok(None) => {
            tracing::warn!(actor_id, "actor lookup returned nothing; caching fallback");
            CachedActor::Fallback(Actor::unknown(actor_id))
        }
        Err(error) if matches!(error.class, ErrorClass::Fatal | ErrorClass::Cancelled) => {
            return Err(error)
        }
        Err(error) => {
            tracing::warn!(
                actor_id,
                class = %error.class,
                attempts = error.attempts,
                "actor lookup failed; caching fallback"
            );
            CachedActor::Fallback(Actor::unknown(actor_id))
        }
    };
    Ok(ctx.actors.insert_once(actor_id, entry))
}

/// Display name for labelling a stream; an interrupted lookup yields an
/// uncached `unknown-<id>`.
pub async fn actor_label(
    ctx: &mut OperationContext,
    actor_id: &str,
) -> Result<String, ClassifiedError> {
    match resolve_actor(ctx, actor_id).await {
        Ok(actor) => Ok(actor.display_name),
        Err(error) if error.class == ErrorClass::Cancelled => {
            Ok(Actor::unknown(actor_id.trim()).display_name)
        }
        Err(error) => Err(error),
    }
}
