//! Paginated collection and rate-limited deletion over a remote messaging API.
//!
//! The engine talks to the remote side only through [`RemoteApi`]; every call is
//! paced and retried by a per-operation rate limiter. [`SweepEngine`] exposes the
//! export and delete operations.

mod actor_cache;
mod aggregator;
mod cancel;
mod clock;
mod collector;
mod config;
mod context;
mod engine;
mod error;
mod mutation_executor;
mod paginator;
mod rate_limiter;
mod remote;
mod retry;
mod stream_resolver;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod thread_expander;
mod types;

pub use aggregator::TruncationOrder;
pub use cancel::CancellationSignal;
pub use clock::{Clock, RecordingClock, TokioClock};
pub use config::{CallClass, CallPolicy, EngineConfig, RateLimitBackoff};
pub use engine::{ExportOptions, SweepEngine};
pub use error::{ClassifiedError, EngineError, ErrorClass};
pub use mutation_executor::DeleteFilters;
pub use remote::{DeleteAck, RemoteApi, RemoteError, StreamInfo, StreamScope};
pub use types::{
    format_ts_micros, parse_ts_micros, sort_chronologically, Actor, CollectionResult, Credential,
    FileRef, MutationOutcome, MutationReport, Page, Record, Stream, StreamKind, StreamStatus,
    StreamSummary, Target, TargetKind, TimeWindow,
};
