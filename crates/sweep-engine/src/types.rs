use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque bearer credential supplied by the caller for one operation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Channel,
    Actor,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Actor => "actor",
        }
    }
}

/// Subject of a collection or mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub id: String,
}

impl Target {
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Channel,
            id: id.into(),
        }
    }

    pub fn actor(id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Actor,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Channel,
    Direct,
    GroupDirect,
}

/// One addressable conversation the remote API can paginate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub display_name: String,
    pub kind: StreamKind,
    /// Other participant of a one-to-one direct conversation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_actor_id: Option<String>,
}

impl Stream {
    pub fn is_direct(&self) -> bool {
        matches!(self.kind, StreamKind::Direct | StreamKind::GroupDirect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One message-equivalent unit within a stream.
///
/// `id` is the remote timestamp (`seconds.micros`) and is unique per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    pub text: String,
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    pub is_thread_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_root_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Record>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
}

impl Record {
    pub fn new(
        stream_id: impl Into<String>,
        id: impl Into<String>,
        actor_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            actor_id: actor_id.into(),
            actor_name: None,
            text: text.into(),
            stream_id: stream_id.into(),
            stream_name: None,
            is_thread_root: false,
            thread_root_id: None,
            replies: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Marks the record as part of the thread rooted at `thread_ts`; it becomes the
    /// root only when `thread_ts` equals its own id.
    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        let thread_ts = thread_ts.into();
        self.is_thread_root = thread_ts == self.id;
        self.thread_root_id = Some(thread_ts);
        self
    }

    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    pub fn timestamp_micros(&self) -> Option<u128> {
        parse_ts_micros(&self.id)
    }
}

/// Parses a remote `seconds.fraction` timestamp into microseconds.
pub fn parse_ts_micros(raw: &str) -> Option<u128> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (seconds, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if seconds.is_empty() || !seconds.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let seconds = seconds.parse::<u128>().ok()?;
    let mut micros = 0_u128;
    for (index, digit) in fraction.bytes().take(6).enumerate() {
        let place = 10_u128.pow(5 - index as u32);
        micros += u128::from(digit - b'0') * place;
    }
    seconds.checked_mul(1_000_000)?.checked_add(micros)
}

/// Formats microseconds as a remote `seconds.micros` timestamp.
pub fn format_ts_micros(micros: u128) -> String {
    format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

/// Sorts records ascending by parsed timestamp; unparseable ids sort last.
pub fn sort_chronologically(records: &mut [Record]) {
    records.sort_by(|left, right| {
        let left_key = left.timestamp_micros().unwrap_or(u128::MAX);
        let right_key = right.timestamp_micros().unwrap_or(u128::MAX);
        left_key.cmp(&right_key).then_with(|| left.id.cmp(&right.id))
    });
}

/// Resolved identity referenced by records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl Actor {
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: format!("unknown-{id}"),
            contact_email: None,
        }
    }
}

/// One page returned by a paged list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
        }
    }

    pub fn more(items: Vec<T>, next_cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(next_cursor.into()),
            has_more: true,
        }
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .map(str::trim)
            .filter(|cursor| !cursor.is_empty())
    }
}

/// Inclusive time bounds applied to records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn oldest_ts(&self) -> Option<String> {
        self.oldest.map(datetime_to_ts)
    }

    pub fn newest_ts(&self) -> Option<String> {
        self.newest.map(datetime_to_ts)
    }

    pub fn contains(&self, record: &Record) -> bool {
        let Some(micros) = record.timestamp_micros() else {
            return self.oldest.is_none() && self.newest.is_none();
        };
        let micros = i128::try_from(micros).unwrap_or(i128::MAX);
        if let Some(oldest) = self.oldest {
            if micros < i128::from(oldest.timestamp_micros()) {
                return false;
            }
        }
        if let Some(newest) = self.newest {
            if micros > i128::from(newest.timestamp_micros()) {
                return false;
            }
        }
        true
    }
}

fn datetime_to_ts(value: DateTime<Utc>) -> String {
    let micros = value.timestamp_micros().max(0);
    format_ts_micros(u128::try_from(micros).unwrap_or(0))
}

/// Terminal state of one stream within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Completed,
    LimitReached,
    Skipped { reason: String },
    Failed { reason: String },
    Cancelled,
}

impl StreamStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::LimitReached)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub stream_name: String,
    pub status: StreamStatus,
    pub records: usize,
}

/// Ordered, stream-tagged records ready for formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub records: Vec<Record>,
    pub streams: Vec<StreamSummary>,
    pub cancelled: bool,
}

impl CollectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// False when the run was cancelled or any stream ended early.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.streams.iter().all(|stream| stream.status.is_complete())
    }

    pub fn total_records(&self) -> usize {
        self.records.len()
    }
}

/// Per-stream delete tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub stream_id: String,
    pub stream_name: String,
    pub succeeded: u64,
    pub failed: u64,
    pub status: StreamStatus,
}

impl MutationOutcome {
    pub fn new(stream: &Stream) -> Self {
        Self {
            stream_id: stream.id.clone(),
            stream_name: stream.display_name.clone(),
            succeeded: 0,
            failed: 0,
            status: StreamStatus::Completed,
        }
    }

    pub fn attempted(&self) -> u64 {
        self.succeeded.saturating_add(self.failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub outcomes: Vec<MutationOutcome>,
    pub cancelled: bool,
}

impl MutationReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self
                .outcomes
                .iter()
                .all(|outcome| outcome.status.is_complete())
    }

    pub fn total_succeeded(&self) -> u64 {
        self.outcomes
            .iter()
            .fold(0, |total, outcome| total.saturating_add(outcome.succeeded))
    }

    pub fn total_failed(&self) -> u64 {
        self.outcomes
            .iter()
            .fold(0, |total, outcome| total.saturating_add(outcome.failed))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn unit_parse_ts_micros_handles_fraction_widths() {
        assert_eq!(parse_ts_micros("1.000"), Some(1_000_000));
        assert_eq!(parse_ts_micros("2.1"), Some(2_100_000));
        assert_eq!(parse_ts_micros("1700000000.123456"), Some(1_700_000_000_123_456));
        assert_eq!(parse_ts_micros("12"), Some(12_000_000));
        assert_eq!(parse_ts_micros(""), None);
        assert_eq!(parse_ts_micros("abc"), None);
        assert_eq!(parse_ts_micros("1.2x"), None);
    }

    #[test]
    fn regression_oversized_timestamp_is_unparseable_not_a_panic() {
        assert_eq!(
            parse_ts_micros("999999999999999999999999999999999999.1"),
            None
        );
        let mut records = vec![
            Record::new("C1", "999999999999999999999999999999999999.1", "U1", "odd"),
            Record::new("C1", "1.000000", "U1", "first"),
        ];
        sort_chronologically(&mut records);
        assert_eq!(records[0].id, "1.000000");
    }

    #[test]
    fn unit_sort_chronologically_orders_numerically_not_lexically() {
        let mut records = vec![
            Record::new("C1", "10.000", "U1", "c"),
            Record::new("C1", "9.500", "U1", "b"),
            Record::new("C1", "9.050", "U1", "a"),
        ];
        sort_chronologically(&mut records);
        let ids = records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["9.050", "9.500", "10.000"]);
    }

    #[test]
    fn unit_in_thread_marks_root_only_when_ids_match() {
        let root = Record::new("C1", "2.000", "U1", "root").in_thread("2.000");
        let reply = Record::new("C1", "2.100", "U2", "reply").in_thread("2.000");
        assert!(root.is_thread_root);
        assert!(!reply.is_thread_root);
        assert_eq!(reply.thread_root_id.as_deref(), Some("2.000"));
    }

    #[test]
    fn unit_time_window_is_inclusive_on_both_ends() {
        let window = TimeWindow {
            oldest: Some(Utc.timestamp_opt(100, 0).single().expect("oldest")),
            newest: Some(Utc.timestamp_opt(200, 0).single().expect("newest")),
        };
        assert!(window.contains(&Record::new("C1", "100.000000", "U1", "")));
        assert!(window.contains(&Record::new("C1", "200.000000", "U1", "")));
        assert!(!window.contains(&Record::new("C1", "99.999999", "U1", "")));
        assert!(!window.contains(&Record::new("C1", "200.000001", "U1", "")));
        assert_eq!(window.oldest_ts().as_deref(), Some("100.000000"));
        assert_eq!(window.newest_ts().as_deref(), Some("200.000000"));
    }

    #[test]
    fn unit_page_next_cursor_ignores_blank_values() {
        let page: Page<u8> = Page {
            items: vec![],
            next_cursor: Some("  ".to_string()),
            has_more: true,
        };
        assert_eq!(page.next_cursor(), None);
        assert_eq!(Page::<u8>::more(vec![], "abc").next_cursor(), Some("abc"));
    }

    #[test]
    fn unit_credential_debug_output_is_redacted() {
        let credential = Credential::new(" xoxp-secret ");
        assert_eq!(credential.expose(), "xoxp-secret");
        assert!(!format!("{credential:?}").contains("secret"));
    }

    #[test]
    fn unit_stream_status_serializes_with_state_tag() {
        let status = StreamStatus::Skipped {
            reason: "not_in_channel".to_string(),
        };
        let value = serde_json::to_value(&status).expect("serialize status");
        assert_eq!(value["state"], "skipped");
        assert_eq!(value["reason"], "not_in_channel");
    }
}
