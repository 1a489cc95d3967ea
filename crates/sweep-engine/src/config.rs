use std::time::Duration;

/// Remote call families with independent pacing and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    /// Conversation and member listings.
    Listing,
    /// Stream history pages.
    History,
    /// Thread reply pages.
    Replies,
    /// Single-entity lookups (actor, stream info, open direct stream).
    Lookup,
    /// Record deletion.
    Mutation,
}

impl CallClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::History => "history",
            Self::Replies => "replies",
            Self::Lookup => "lookup",
            Self::Mutation => "mutation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackoff {
    /// `base_ms * 2^(retry-1)` capped at `max_ms`, plus bounded jitter.
    Exponential {
        base_ms: u64,
        max_ms: u64,
        max_retries: usize,
    },
    Fixed {
        wait_ms: u64,
        max_retries: usize,
    },
}

impl RateLimitBackoff {
    pub fn max_retries(&self) -> usize {
        match self {
            Self::Exponential { max_retries, .. } | Self::Fixed { max_retries, .. } => *max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPolicy {
    /// Minimum spacing between the previous remote call and a call of this class.
    pub min_interval_ms: u64,
    pub rate_limit: RateLimitBackoff,
    /// Retries after a transient failure (or an exhausted rate-limit budget).
    pub transient_retries: usize,
    pub transient_delay_ms: u64,
}

impl CallPolicy {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn read(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            rate_limit: RateLimitBackoff::Exponential {
                base_ms: 2_000,
                max_ms: 30_000,
                max_retries: 3,
            },
            transient_retries: 2,
            transient_delay_ms: 2_000,
        }
    }
}

/// Tunables for one engine instance; every operation reads them immutably.
///
/// # Examples
///
/// ```
/// use sweep_engine::{CallClass, EngineConfig};
///
/// let config = EngineConfig {
///     default_limit: 250,
///     ..EngineConfig::default()
/// };
///
/// assert_eq!(config.default_limit, 250);
/// assert_eq!(config.policy(CallClass::Mutation).min_interval_ms, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub listing: CallPolicy,
    pub history: CallPolicy,
    pub replies: CallPolicy,
    pub lookup: CallPolicy,
    pub mutation: CallPolicy,
    pub history_page_size: usize,
    pub replies_page_size: usize,
    pub listing_page_size: usize,
    pub export_stream_pause_ms: u64,
    pub delete_stream_pause_ms: u64,
    pub default_limit: usize,
    pub max_stalled_pages: usize,
    pub max_pages_per_stream: usize,
    pub operation_timeout_ms: Option<u64>,
    pub jitter: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listing: CallPolicy::read(1_200),
            history: CallPolicy::read(1_000),
            replies: CallPolicy::read(1_200),
            lookup: CallPolicy::read(0),
            mutation: CallPolicy {
                min_interval_ms: 500,
                rate_limit: RateLimitBackoff::Fixed {
                    wait_ms: 5_000,
                    max_retries: 1,
                },
                transient_retries: 0,
                transient_delay_ms: 0,
            },
            history_page_size: 100,
            replies_page_size: 200,
            listing_page_size: 200,
            export_stream_pause_ms: 500,
            delete_stream_pause_ms: 2_000,
            default_limit: 1_000,
            max_stalled_pages: 3,
            max_pages_per_stream: 10_000,
            operation_timeout_ms: None,
            jitter: true,
        }
    }
}

impl EngineConfig {
    pub fn policy(&self, class: CallClass) -> &CallPolicy {
        match class {
            CallClass::Listing => &self.listing,
            CallClass::History => &self.history,
            CallClass::Replies => &self.replies,
            CallClass::Lookup => &self.lookup,
            CallClass::Mutation => &self.mutation,
        }
    }

    pub fn policy_mut(&mut self, class: CallClass) -> &mut CallPolicy {
        match class {
            CallClass::Listing => &mut self.listing,
            CallClass::History => &mut self.history,
            CallClass::Replies => &mut self.replies,
            CallClass::Lookup => &mut self.lookup,
            CallClass::Mutation => &mut self.mutation,
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms
            .filter(|value| *value > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_default_mutation_policy_retries_rate_limit_once_with_long_wait() {
        let config = EngineConfig::default();
        assert_eq!(
            config.policy(CallClass::Mutation).rate_limit,
            RateLimitBackoff::Fixed {
                wait_ms: 5_000,
                max_retries: 1,
            }
        );
        assert_eq!(config.policy(CallClass::Mutation).transient_retries, 0);
        assert!(
            config.policy(CallClass::Mutation).min_interval_ms
                < config.policy(CallClass::History).min_interval_ms
        );
    }

    #[test]
    fn unit_operation_timeout_treats_zero_as_disabled() {
        let mut config = EngineConfig::default();
        assert_eq!(config.operation_timeout(), None);
        config.operation_timeout_ms = Some(0);
        assert_eq!(config.operation_timeout(), None);
        config.operation_timeout_ms = Some(2_500);
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(2_500)));
    }

    #[test]
    fn unit_policy_mut_updates_only_the_selected_class() {
        let mut config = EngineConfig::default();
        config.policy_mut(CallClass::Replies).min_interval_ms = 0;
        assert_eq!(config.replies.min_interval_ms, 0);
        assert_eq!(config.listing.min_interval_ms, 1_200);
    }
}
