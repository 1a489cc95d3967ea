//! In-memory `RemoteApi` used by engine and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::remote::{DeleteAck, RemoteApi, RemoteError, StreamInfo, StreamScope};
use crate::types::{
    parse_ts_micros, sort_chronologically, Actor, Credential, Page, Record, Stream, StreamKind,
    TimeWindow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeMethod {
    ListStreams,
    StreamInfo,
    History,
    Replies,
    GetActor,
    Delete,
    OpenDirect,
    Members,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCall {
    pub method: FakeMethod,
    pub key: String,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
struct FakeStream {
    stream: Stream,
    info_visible: bool,
    stalled_cursor: bool,
    records: Vec<Record>,
    replies: HashMap<String, Vec<Record>>,
    members: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    credential: Option<String>,
    streams: Vec<FakeStream>,
    memberships: HashMap<String, Vec<String>>,
    actors: HashMap<String, Actor>,
    direct_streams: HashMap<String, String>,
    already_gone: HashSet<(String, String)>,
    failures: HashMap<(FakeMethod, String), VecDeque<Option<RemoteError>>>,
    history_page_size: Option<usize>,
    calls: Vec<FakeCall>,
}

impl FakeState {
    fn stream(&self, stream_id: &str) -> Option<&FakeStream> {
        self.streams
            .iter()
            .find(|entry| entry.stream.id == stream_id)
    }

    fn stream_mut(&mut self, stream_id: &str) -> Option<&mut FakeStream> {
        self.streams
            .iter_mut()
            .find(|entry| entry.stream.id == stream_id)
    }

    fn record_call(
        &mut self,
        credential: &Credential,
        method: FakeMethod,
        key: &str,
        cursor: Option<&str>,
    ) -> Result<(), RemoteError> {
        self.calls.push(FakeCall {
            method,
            key: key.to_string(),
            cursor: cursor.map(ToOwned::to_owned),
        });
        if let Some(expected) = &self.credential {
            if expected != credential.expose() {
                return Err(RemoteError::Unauthorized {
                    code: "invalid_auth".to_string(),
                });
            }
        }
        let scripted = self
            .failures
            .get_mut(&(method, key.to_string()))
            .and_then(VecDeque::pop_front)
            .flatten();
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Scriptable in-memory workspace.
///
/// History pages are served newest first and thread pages start with the root,
/// matching the remote API the engine targets.
#[derive(Debug, Default)]
pub struct FakeRemoteApi {
    state: Mutex<FakeState>,
}

impl FakeRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn require_credential(&self, token: &str) {
        self.state().credential = Some(token.to_string());
    }

    pub fn add_stream(&self, stream: Stream) {
        self.state().streams.push(FakeStream {
            stream,
            info_visible: true,
            stalled_cursor: false,
            records: Vec::new(),
            replies: HashMap::new(),
            members: Vec::new(),
        });
    }

    pub fn add_channel(&self, stream_id: &str, name: &str) {
        self.add_stream(Stream {
            id: stream_id.to_string(),
            display_name: name.to_string(),
            kind: StreamKind::Channel,
            counterpart_actor_id: None,
        });
    }

    pub fn add_direct(&self, stream_id: &str, counterpart_actor_id: &str) {
        self.add_stream(Stream {
            id: stream_id.to_string(),
            display_name: String::new(),
            kind: StreamKind::Direct,
            counterpart_actor_id: Some(counterpart_actor_id.to_string()),
        });
    }

    pub fn add_group_direct(&self, stream_id: &str, name: &str, members: &[&str]) {
        self.add_stream(Stream {
            id: stream_id.to_string(),
            display_name: name.to_string(),
            kind: StreamKind::GroupDirect,
            counterpart_actor_id: None,
        });
        let mut state = self.state();
        if let Some(entry) = state.stream_mut(stream_id) {
            entry.members = members.iter().map(|member| member.to_string()).collect();
        }
    }

    pub fn hide_stream_info(&self, stream_id: &str) {
        if let Some(entry) = self.state().stream_mut(stream_id) {
            entry.info_visible = false;
        }
    }

    pub fn stall_history_cursor(&self, stream_id: &str) {
        if let Some(entry) = self.state().stream_mut(stream_id) {
            entry.stalled_cursor = true;
        }
    }

    /// Adds `stream_id` to the conversations listed for `actor_id`.
    pub fn add_membership(&self, actor_id: &str, stream_id: &str) {
        let mut state = self.state();
        state
            .memberships
            .entry(actor_id.to_string())
            .or_default()
            .push(stream_id.to_string());
        if let Some(entry) = state.stream_mut(stream_id) {
            if !entry.members.iter().any(|member| member == actor_id) {
                entry.members.push(actor_id.to_string());
            }
        }
    }

    pub fn add_actor(&self, actor_id: &str, display_name: &str, contact_email: Option<&str>) {
        self.state().actors.insert(
            actor_id.to_string(),
            Actor {
                id: actor_id.to_string(),
                display_name: display_name.to_string(),
                contact_email: contact_email.map(ToOwned::to_owned),
            },
        );
    }

    pub fn set_direct_stream(&self, other_actor_id: &str, stream_id: &str) {
        self.state()
            .direct_streams
            .insert(other_actor_id.to_string(), stream_id.to_string());
    }

    pub fn push_record(&self, record: Record) {
        let mut state = self.state();
        if let Some(entry) = state.stream_mut(&record.stream_id) {
            entry.records.push(record);
        }
    }

    pub fn push_reply(&self, root_id: &str, reply: Record) {
        let mut state = self.state();
        if let Some(entry) = state.stream_mut(&reply.stream_id) {
            entry
                .replies
                .entry(root_id.to_string())
                .or_default()
                .push(reply.in_thread(root_id));
        }
    }

    /// The record stays listed but deleting it reports it as already gone.
    pub fn mark_already_gone(&self, stream_id: &str, record_id: &str) {
        self.state()
            .already_gone
            .insert((stream_id.to_string(), record_id.to_string()));
    }

    pub fn set_history_page_size(&self, page_size: usize) {
        self.state().history_page_size = Some(page_size.max(1));
    }

    /// Queues `error` for the next `times` calls of `method` keyed by `key`.
    ///
    /// Keys: actor id for listings and lookups, stream id for info, history and
    /// members, `stream/root` for replies, record id for deletes, other actor id
    /// for opening direct streams.
    pub fn fail_times(&self, method: FakeMethod, key: &str, error: RemoteError, times: usize) {
        self.fail_after(method, key, 0, error, times);
    }

    /// Lets `passes` calls through before queueing `times` failures.
    pub fn fail_after(
        &self,
        method: FakeMethod,
        key: &str,
        passes: usize,
        error: RemoteError,
        times: usize,
    ) {
        let mut state = self.state();
        let queue = state.failures.entry((method, key.to_string())).or_default();
        queue.extend(std::iter::repeat(None).take(passes));
        queue.extend(std::iter::repeat(Some(error)).take(times));
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, method: FakeMethod) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    pub fn calls_for(&self, method: FakeMethod, key: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.method == method && call.key == key)
            .count()
    }

    pub fn remaining_record_ids(&self, stream_id: &str) -> Vec<String> {
        let state = self.state();
        let mut records = state
            .stream(stream_id)
            .map(|entry| entry.records.clone())
            .unwrap_or_default();
        sort_chronologically(&mut records);
        records.into_iter().map(|record| record.id).collect()
    }
}

fn parse_offset(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|cursor| cursor.strip_prefix("offset:"))
        .and_then(|offset| offset.parse::<usize>().ok())
        .unwrap_or(0)
}

fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, page_size: usize) -> Page<T> {
    let offset = parse_offset(cursor).min(items.len());
    let end = offset.saturating_add(page_size.max(1)).min(items.len());
    let chunk = items[offset..end].to_vec();
    if end < items.len() {
        Page::more(chunk, format!("offset:{end}"))
    } else {
        Page::last(chunk)
    }
}

fn missing_stream(stream_id: &str) -> RemoteError {
    RemoteError::Inaccessible {
        code: format!("channel_not_found:{stream_id}"),
    }
}

#[async_trait]
impl RemoteApi for FakeRemoteApi {
    async fn list_streams_for_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
        scope: StreamScope,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Stream>, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::ListStreams, actor_id, cursor)?;
        let stream_ids = state
            .memberships
            .get(actor_id)
            .cloned()
            .unwrap_or_default();
        let streams = stream_ids
            .iter()
            .filter_map(|stream_id| state.stream(stream_id))
            .map(|entry| entry.stream.clone())
            .filter(|stream| scope == StreamScope::All || stream.is_direct())
            .collect::<Vec<_>>();
        Ok(paginate(&streams, cursor, page_size))
    }

    async fn get_stream_info(
        &self,
        credential: &Credential,
        stream_id: &str,
    ) -> Result<Option<StreamInfo>, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::StreamInfo, stream_id, None)?;
        Ok(state
            .stream(stream_id)
            .filter(|entry| entry.info_visible)
            .map(|entry| StreamInfo {
                id: entry.stream.id.clone(),
                name: Some(entry.stream.display_name.clone()).filter(|name| !name.is_empty()),
                kind: entry.stream.kind,
                counterpart_actor_id: entry.stream.counterpart_actor_id.clone(),
            }))
    }

    async fn fetch_history(
        &self,
        credential: &Credential,
        stream_id: &str,
        cursor: Option<&str>,
        window: &TimeWindow,
        page_size: usize,
    ) -> Result<Page<Record>, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::History, stream_id, cursor)?;
        let page_size = state
            .history_page_size
            .map_or(page_size, |limit| limit.min(page_size));
        let entry = state
            .stream(stream_id)
            .ok_or_else(|| missing_stream(stream_id))?;
        let mut records = entry
            .records
            .iter()
            .filter(|record| window.contains(record))
            .cloned()
            .collect::<Vec<_>>();
        sort_chronologically(&mut records);
        records.reverse();
        if entry.stalled_cursor {
            let mut page = paginate(&records, None, page_size);
            page.next_cursor = Some("stuck".to_string());
            page.has_more = true;
            return Ok(page);
        }
        // Cursors name the oldest record served so far, so deletes between
        // pages never shift what the next page returns.
        let before = cursor
            .and_then(|cursor| cursor.strip_prefix("before:"))
            .and_then(parse_ts_micros);
        let older = records
            .into_iter()
            .filter(|record| {
                before.map_or(true, |before| {
                    record.timestamp_micros().is_some_and(|micros| micros < before)
                })
            })
            .collect::<Vec<_>>();
        let mut page = paginate(&older, None, page_size);
        if page.has_more {
            page.next_cursor = page
                .items
                .last()
                .map(|record| format!("before:{}", record.id));
        }
        Ok(page)
    }

    async fn fetch_replies(
        &self,
        credential: &Credential,
        stream_id: &str,
        root_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Record>, RemoteError> {
        let mut state = self.state();
        let key = format!("{stream_id}/{root_id}");
        state.record_call(credential, FakeMethod::Replies, &key, cursor)?;
        let entry = state
            .stream(stream_id)
            .ok_or_else(|| missing_stream(stream_id))?;
        let root = entry
            .records
            .iter()
            .find(|record| record.id == root_id)
            .cloned()
            .ok_or_else(|| RemoteError::Gone {
                code: "thread_not_found".to_string(),
            })?;
        let mut replies = entry.replies.get(root_id).cloned().unwrap_or_default();
        sort_chronologically(&mut replies);
        let mut page = paginate(&replies, cursor, page_size);
        page.items.insert(0, root);
        Ok(page)
    }

    async fn get_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
    ) -> Result<Option<Actor>, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::GetActor, actor_id, None)?;
        Ok(state.actors.get(actor_id).cloned())
    }

    async fn delete_record(
        &self,
        credential: &Credential,
        stream_id: &str,
        record_id: &str,
    ) -> Result<DeleteAck, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::Delete, record_id, None)?;
        let already_gone = state
            .already_gone
            .contains(&(stream_id.to_string(), record_id.to_string()));
        let entry = state
            .stream_mut(stream_id)
            .ok_or_else(|| missing_stream(stream_id))?;
        let mut removed = false;
        entry.records.retain(|record| {
            let keep = record.id != record_id;
            removed |= !keep;
            keep
        });
        for replies in entry.replies.values_mut() {
            replies.retain(|reply| {
                let keep = reply.id != record_id;
                removed |= !keep;
                keep
            });
        }
        if already_gone || !removed {
            return Ok(DeleteAck::AlreadyGone);
        }
        Ok(DeleteAck::Deleted)
    }

    async fn open_direct_stream(
        &self,
        credential: &Credential,
        other_actor_id: &str,
    ) -> Result<String, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::OpenDirect, other_actor_id, None)?;
        state
            .direct_streams
            .get(other_actor_id)
            .cloned()
            .ok_or_else(|| RemoteError::Inaccessible {
                code: "user_not_found".to_string(),
            })
    }

    async fn list_stream_members(
        &self,
        credential: &Credential,
        stream_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<String>, RemoteError> {
        let mut state = self.state();
        state.record_call(credential, FakeMethod::Members, stream_id, cursor)?;
        let entry = state
            .stream(stream_id)
            .ok_or_else(|| missing_stream(stream_id))?;
        Ok(paginate(&entry.members, cursor, page_size))
    }
}

#[cfg(test)]
pub(crate) fn context_for(
    api: &std::sync::Arc<FakeRemoteApi>,
    config: crate::config::EngineConfig,
) -> (
    crate::context::OperationContext,
    std::sync::Arc<crate::clock::RecordingClock>,
) {
    use std::sync::Arc;

    let clock = Arc::new(crate::clock::RecordingClock::new());
    let remote: Arc<dyn RemoteApi> = api.clone();
    let ctx = crate::context::OperationContext::new(
        remote,
        Credential::new("xoxp-test"),
        Arc::new(config),
        clock.clone(),
        crate::cancel::CancellationSignal::new(),
    );
    (ctx, clock)
}
