//! Abstract capability set the engine needs from the remote messaging API.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Actor, Credential, Page, Record, Stream, StreamKind, TimeWindow};

/// Failure reported by a remote adapter, before engine classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("credential rejected: {code}")]
    Unauthorized { code: String },
    #[error("stream not accessible: {code}")]
    Inaccessible { code: String },
    #[error("target no longer exists: {code}")]
    Gone { code: String },
    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("remote rejected request: {code}")]
    Rejected { code: String },
}

impl RemoteError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Which conversations a "conversations for actor" listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamScope {
    /// Public, private, direct and group-direct conversations.
    All,
    /// Direct and group-direct conversations only.
    DirectOnly,
}

impl StreamScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::DirectOnly => "direct_only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: String,
    pub name: Option<String>,
    pub kind: StreamKind,
    pub counterpart_actor_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAck {
    Deleted,
    AlreadyGone,
}

/// Remote API surface used by every engine component.
///
/// Adapters perform exactly one remote request per call; retries, pacing and
/// classification belong to the engine's rate limiter.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_streams_for_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
        scope: StreamScope,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Stream>, RemoteError>;

    async fn get_stream_info(
        &self,
        credential: &Credential,
        stream_id: &str,
    ) -> Result<Option<StreamInfo>, RemoteError>;

    /// Returns records newest first, as the remote history endpoint does.
    async fn fetch_history(
        &self,
        credential: &Credential,
        stream_id: &str,
        cursor: Option<&str>,
        window: &TimeWindow,
        page_size: usize,
    ) -> Result<Page<Record>, RemoteError>;

    /// Returns the thread root first, followed by replies.
    async fn fetch_replies(
        &self,
        credential: &Credential,
        stream_id: &str,
        root_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Record>, RemoteError>;

    async fn get_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
    ) -> Result<Option<Actor>, RemoteError>;

    async fn delete_record(
        &self,
        credential: &Credential,
        stream_id: &str,
        record_id: &str,
    ) -> Result<DeleteAck, RemoteError>;

    async fn open_direct_stream(
        &self,
        credential: &Credential,
        other_actor_id: &str,
    ) -> Result<String, RemoteError>;

    async fn list_stream_members(
        &self,
        credential: &Credential,
        stream_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<String>, RemoteError>;
}
