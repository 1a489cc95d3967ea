use std::future::Future;
use std::sync::Arc;

use crate::actor_cache::ActorCache;
use crate::cancel::CancellationSignal;
use crate::clock::Clock;
use crate::config::{CallClass, EngineConfig};
use crate::error::ClassifiedError;
use crate::rate_limiter::RateLimiter;
use crate::remote::{RemoteApi, RemoteError};
use crate::types::Credential;

/// State owned by exactly one top-level operation.
///
/// Built fresh per export or delete run and dropped when it returns, so the
/// actor cache and pacing state never leak across operations.
pub struct OperationContext {
    pub(crate) api: Arc<dyn RemoteApi>,
    pub(crate) credential: Credential,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) limiter: RateLimiter,
    pub(crate) actors: ActorCache,
    pub(crate) cancel: CancellationSignal,
}

impl OperationContext {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        credential: Credential,
        config: Arc<EngineConfig>,
        clock: Arc<dyn Clock>,
        cancel: CancellationSignal,
    ) -> Self {
        let limiter = RateLimiter::new(Arc::clone(&config), clock);
        Self {
            api,
            credential,
            config,
            limiter,
            actors: ActorCache::new(),
            cancel,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn remote_calls(&self) -> u64 {
        self.limiter.calls()
    }

    pub fn is_interrupted(&self) -> bool {
        self.limiter.interrupted(&self.cancel)
    }

    /// Issues one remote call through the rate limiter.
    pub(crate) async fn call<T, F, Fut>(
        &mut self,
        class: CallClass,
        operation: &str,
        mut call: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(Arc<dyn RemoteApi>, Credential) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let api = Arc::clone(&self.api);
        let credential = self.credential.clone();
        self.limiter
            .execute(class, operation, &self.cancel, || {
                call(Arc::clone(&api), credential.clone())
            })
            .await
    }

    /// Pause between streams; returns false when the operation was interrupted.
    pub(crate) async fn pause_between_streams(&mut self, pause_ms: u64) -> bool {
        self.limiter
            .pause(std::time::Duration::from_millis(pause_ms), &self.cancel)
            .await
    }
}
