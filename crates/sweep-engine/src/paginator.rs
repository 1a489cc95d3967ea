//! Cursor-driven page iteration shared by every paged endpoint.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::config::CallClass;
use crate::context::OperationContext;
use crate::error::{ClassifiedError, ErrorClass};
use crate::remote::{RemoteApi, RemoteError, StreamScope};
use crate::types::{Credential, Page, Record, Stream, StreamStatus, TimeWindow};

/// One paged remote endpoint bound to its arguments.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    fn class(&self) -> CallClass;

    fn operation(&self) -> &'static str;

    async fn fetch(
        &self,
        api: &dyn RemoteApi,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> Result<Page<Self::Item>, RemoteError>;
}

pub struct HistorySource {
    pub stream_id: String,
    pub window: TimeWindow,
    pub page_size: usize,
}

#[async_trait]
impl PageSource for HistorySource {
    type Item = Record;

    fn class(&self) -> CallClass {
        CallClass::History
    }

    fn operation(&self) -> &'static str {
        "conversations.history"
    }

    async fn fetch(
        &self,
        api: &dyn RemoteApi,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> Result<Page<Record>, RemoteError> {
        api.fetch_history(
            credential,
            &self.stream_id,
            cursor,
            &self.window,
            self.page_size,
        )
        .await
    }
}

pub struct RepliesSource {
    pub stream_id: String,
    pub root_id: String,
    pub page_size: usize,
}

#[async_trait]
impl PageSource for RepliesSource {
    type Item = Record;

    fn class(&self) -> CallClass {
        CallClass::Replies
    }

    fn operation(&self) -> &'static str {
        "conversations.replies"
    }

    async fn fetch(
        &self,
        api: &dyn RemoteApi,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> Result<Page<Record>, RemoteError> {
        api.fetch_replies(
            credential,
            &self.stream_id,
            &self.root_id,
            cursor,
            self.page_size,
        )
        .await
    }
}

pub struct ActorStreamsSource {
    pub actor_id: String,
    pub scope: StreamScope,
    pub page_size: usize,
}

#[async_trait]
impl PageSource for ActorStreamsSource {
    type Item = Stream;

    fn class(&self) -> CallClass {
        CallClass::Listing
    }

    fn operation(&self) -> &'static str {
        "users.conversations"
    }

    async fn fetch(
        &self,
        api: &dyn RemoteApi,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> Result<Page<Stream>, RemoteError> {
        api.list_streams_for_actor(
            credential,
            &self.actor_id,
            self.scope,
            cursor,
            self.page_size,
        )
        .await
    }
}

pub struct MembersSource {
    pub stream_id: String,
    pub page_size: usize,
}

#[async_trait]
impl PageSource for MembersSource {
    type Item = String;

    fn class(&self) -> CallClass {
        CallClass::Listing
    }

    fn operation(&self) -> &'static str {
        "conversations.members"
    }

    async fn fetch(
        &self,
        api: &dyn RemoteApi,
        credential: &Credential,
        cursor: Option<&str>,
    ) -> Result<Page<String>, RemoteError> {
        api.list_stream_members(credential, &self.stream_id, cursor, self.page_size)
            .await
    }
}

/// How a paged read ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEnd {
    Exhausted,
    /// The caller's budget was met before the source ran out.
    Stopped,
    Skipped(String),
    Failed(String),
    Cancelled,
}

impl PageEnd {
    /// Maps a non-fatal classified error to a page end; `Fatal` is handed back.
    pub(crate) fn from_error(error: ClassifiedError) -> Result<Self, ClassifiedError> {
        match error.class {
            ErrorClass::Fatal => Err(error),
            ErrorClass::Cancelled => Ok(Self::Cancelled),
            ErrorClass::SkipStream | ErrorClass::AlreadySatisfied => {
                Ok(Self::Skipped(error.message))
            }
            ErrorClass::RateLimited | ErrorClass::Transient | ErrorClass::StreamFailure => {
                Ok(Self::Failed(error.message))
            }
        }
    }

    pub fn into_status(self) -> StreamStatus {
        match self {
            Self::Exhausted => StreamStatus::Completed,
            Self::Stopped => StreamStatus::LimitReached,
            Self::Skipped(reason) => StreamStatus::Skipped { reason },
            Self::Failed(reason) => StreamStatus::Failed { reason },
            Self::Cancelled => StreamStatus::Cancelled,
        }
    }
}

#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub end: PageEnd,
}

/// Walks a `PageSource` until the remote reports no further pages.
///
/// Continues only while the page says `has_more` and carries a non-empty cursor.
/// A cursor seen before counts as a stalled page; after `max_stalled_pages`
/// consecutive stalls the walk ends with a `StreamFailure` once the current
/// page's items have been handed out.
pub struct Paginator<S: PageSource> {
    source: S,
    cursor: Option<String>,
    seen_cursors: HashSet<String>,
    pages: usize,
    stalled: usize,
    finished: bool,
    pending: Option<ClassifiedError>,
}

impl<S: PageSource> Paginator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cursor: None,
            seen_cursors: HashSet::new(),
            pages: 0,
            stalled: 0,
            finished: false,
            pending: None,
        }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// True once the remote reported its last page and nothing is pending.
    pub fn is_exhausted(&self) -> bool {
        self.finished && self.pending.is_none()
    }

    /// Fetches the next page, `Ok(None)` once the source is exhausted.
    pub async fn next_page(
        &mut self,
        ctx: &mut OperationContext,
    ) -> Result<Option<Vec<S::Item>>, ClassifiedError> {
        if let Some(error) = self.pending.take() {
            return Err(error);
        }
        if self.finished {
            return Ok(None);
        }
        let operation = self.source.operation();
        if ctx.is_interrupted() {
            self.finished = true;
            return Err(ClassifiedError::cancelled(operation, 0));
        }
        let max_pages = ctx.config().max_pages_per_stream;
        if self.pages >= max_pages {
            self.finished = true;
            tracing::warn!(operation, pages = self.pages, "page ceiling reached");
            return Err(ClassifiedError::new(
                ErrorClass::StreamFailure,
                operation,
                0,
                format!("page ceiling of {max_pages} reached"),
            ));
        }

        let source = &self.source;
        let cursor = self.cursor.as_deref();
        let result = ctx
            .call(
                source.class(),
                operation,
                move |api, credential| async move {
                    source.fetch(api.as_ref(), &credential, cursor).await
                },
            )
            .await;
        let page = match result {
            Ok(page) => page,
            Err(error) => {
                self.finished = true;
                return Err(error);
            }
        };
        self.pages = self.pages.saturating_add(1);

        let next_cursor = page.next_cursor().map(ToOwned::to_owned);
        match next_cursor {
            Some(next_cursor) if page.has_more => {
                if self.seen_cursors.insert(next_cursor.clone()) {
                    self.stalled = 0;
                } else {
                    self.stalled = self.stalled.saturating_add(1);
                    tracing::warn!(
                        operation,
                        stalled = self.stalled,
                        "cursor repeated without progress"
                    );
                    if self.stalled >= ctx.config().max_stalled_pages.max(1) {
                        self.finished = true;
                        self.pending = Some(ClassifiedError::new(
                            ErrorClass::StreamFailure,
                            operation,
                            self.pages,
                            "cursor stopped advancing",
                        ));
                    }
                }
                self.cursor = Some(next_cursor);
            }
            _ => self.finished = true,
        }
        Ok(Some(page.items))
    }

    /// Drains pages while `keep_going(items_so_far)` holds.
    ///
    /// No further page is requested once `keep_going` returns false. Only
    /// `Fatal` errors surface as `Err`; everything else ends the walk with the
    /// items gathered so far.
    pub async fn collect<F>(
        mut self,
        ctx: &mut OperationContext,
        mut keep_going: F,
    ) -> Result<Collected<S::Item>, ClassifiedError>
    where
        F: FnMut(usize) -> bool,
    {
        let mut items = Vec::new();
        let mut truncated = false;
        let end = loop {
            if !keep_going(items.len()) {
                break if self.is_exhausted() && !truncated {
                    PageEnd::Exhausted
                } else {
                    PageEnd::Stopped
                };
            }
            match self.next_page(ctx).await {
                Ok(Some(page)) => {
                    for item in page {
                        if !keep_going(items.len()) {
                            truncated = true;
                            break;
                        }
                        items.push(item);
                    }
                }
                Ok(None) => break PageEnd::Exhausted,
                Err(error) => break PageEnd::from_error(error)?,
            }
        };
        Ok(Collected { items, end })
    }
}
