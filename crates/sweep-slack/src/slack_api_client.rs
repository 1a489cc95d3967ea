//! Slack Web API adapter behind the engine's `RemoteApi` capability set.
//!
//! Each method issues exactly one HTTP request; pacing and retries belong to
//! the engine's rate limiter.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sweep_engine::{
    Actor, Credential, DeleteAck, FileRef, Page, Record, RemoteApi, RemoteError, Stream,
    StreamInfo, StreamKind, StreamScope, TimeWindow,
};

use crate::slack_helpers::{classify_slack_error, parse_retry_after, truncate_for_error};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackApiConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for SlackApiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SLACK_API_BASE.to_string(),
            request_timeout_ms: 30_000,
            user_agent: "slack-sweep".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackEnvelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    response_metadata: Option<SlackResponseMetadata>,
    #[serde(flatten)]
    body: T,
}

impl<T> SlackEnvelope<T> {
    fn next_cursor(&self) -> Option<String> {
        self.response_metadata
            .as_ref()
            .and_then(|metadata| metadata.next_cursor.as_deref())
            .map(str::trim)
            .filter(|cursor| !cursor.is_empty())
            .map(ToOwned::to_owned)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlackResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackConversationsBody {
    #[serde(default)]
    channels: Vec<SlackConversation>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackConversationBody {
    #[serde(default)]
    channel: Option<SlackConversation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackConversation {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_im: bool,
    #[serde(default)]
    is_mpim: bool,
    #[serde(default)]
    user: Option<String>,
}

impl SlackConversation {
    fn kind(&self) -> StreamKind {
        if self.is_im {
            StreamKind::Direct
        } else if self.is_mpim {
            StreamKind::GroupDirect
        } else {
            StreamKind::Channel
        }
    }

    fn into_stream(self) -> Stream {
        let kind = self.kind();
        Stream {
            id: self.id,
            display_name: self.name.unwrap_or_default(),
            kind,
            counterpart_actor_id: self.user.filter(|user| !user.is_empty()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlackMessagesBody {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    files: Vec<SlackFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url_private: Option<String>,
}

impl SlackMessage {
    fn into_record(self, stream_id: &str) -> Record {
        let actor_id = self.user.or(self.bot_id).unwrap_or_default();
        let files = self
            .files
            .into_iter()
            .map(|file| FileRef {
                name: file
                    .name
                    .or(file.title)
                    .unwrap_or_else(|| "file".to_string()),
                url: file.url_private,
            })
            .collect();
        let record = Record::new(stream_id, self.ts, actor_id, self.text).with_files(files);
        match self.thread_ts.filter(|thread_ts| !thread_ts.trim().is_empty()) {
            Some(thread_ts) => record.in_thread(thread_ts),
            None => record,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlackUserBody {
    #[serde(default)]
    user: Option<SlackUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl SlackUser {
    /// Real name, then handle, then `user-<id>`.
    fn into_actor(self) -> Actor {
        let profile = self.profile.unwrap_or_default();
        let display_name = [self.real_name, profile.real_name, self.name]
            .into_iter()
            .flatten()
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| format!("user-{}", self.id));
        Actor {
            id: self.id,
            display_name,
            contact_email: profile.email.filter(|email| !email.trim().is_empty()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SlackMembersBody {
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackEmptyBody {}

#[derive(Clone)]
pub struct SlackWebApiClient {
    http: reqwest::Client,
    api_base: String,
}

impl SlackWebApiClient {
    pub fn new(config: &SlackApiConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_str(config.user_agent.trim())
                .context("invalid slack user agent")?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, method: &str, credential: &Credential) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{method}", self.api_base))
            .bearer_auth(credential.expose())
    }

    fn post(&self, method: &str, credential: &Credential) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(credential.expose())
    }

    async fn request_json<T>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<SlackEnvelope<T>, RemoteError>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(|error| {
            tracing::debug!(operation, error = %error, "slack request failed");
            RemoteError::Transport {
                message: format!("slack api {operation} request failed: {error}"),
            }
        })?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        tracing::debug!(operation, status = status.as_u16(), "slack api response");
        if status.as_u16() == 429 {
            return Err(RemoteError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "slack api {operation} failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 800)
            );
            return Err(match status.as_u16() {
                401 => RemoteError::Unauthorized {
                    code: "http_401".to_string(),
                },
                500..=599 => RemoteError::Transport { message },
                other => RemoteError::Rejected {
                    code: format!("http_{other}"),
                },
            });
        }

        let envelope = response
            .json::<SlackEnvelope<T>>()
            .await
            .map_err(|error| RemoteError::Transport {
                message: format!("failed to decode slack {operation}: {error}"),
            })?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_default();
            return Err(classify_slack_error(&code, retry_after));
        }
        Ok(envelope)
    }
}

fn page_size_param(page_size: usize) -> String {
    page_size.clamp(1, 1_000).to_string()
}

#[async_trait]
impl RemoteApi for SlackWebApiClient {
    async fn list_streams_for_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
        scope: StreamScope,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Stream>, RemoteError> {
        let types = match scope {
            StreamScope::All => "public_channel,private_channel,im,mpim",
            StreamScope::DirectOnly => "im,mpim",
        };
        let mut query = vec![
            ("user", actor_id.to_string()),
            ("types", types.to_string()),
            ("exclude_archived", "false".to_string()),
            ("limit", page_size_param(page_size)),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<SlackConversationsBody> = self
            .request_json(
                "users.conversations",
                self.get("users.conversations", credential).query(&query),
            )
            .await?;
        let next_cursor = envelope.next_cursor();
        Ok(Page {
            has_more: next_cursor.is_some(),
            next_cursor,
            items: envelope
                .body
                .channels
                .into_iter()
                .map(SlackConversation::into_stream)
                .collect(),
        })
    }

    async fn get_stream_info(
        &self,
        credential: &Credential,
        stream_id: &str,
    ) -> Result<Option<StreamInfo>, RemoteError> {
        let envelope: SlackEnvelope<SlackConversationBody> = self
            .request_json(
                "conversations.info",
                self.get("conversations.info", credential)
                    .query(&[("channel", stream_id)]),
            )
            .await?;
        Ok(envelope.body.channel.map(|conversation| {
            let kind = conversation.kind();
            StreamInfo {
                id: conversation.id,
                name: conversation.name.filter(|name| !name.trim().is_empty()),
                kind,
                counterpart_actor_id: conversation.user,
            }
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
        let mut query = vec![
            ("channel", stream_id.to_string()),
            ("limit", page_size_param(page_size)),
            ("inclusive", "true".to_string()),
        ];
        if let Some(oldest) = window.oldest_ts() {
            query.push(("oldest", oldest));
        }
        if let Some(latest) = window.newest_ts() {
            query.push(("latest", latest));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<SlackMessagesBody> = self
            .request_json(
                "conversations.history",
                self.get("conversations.history", credential).query(&query),
            )
            .await?;
        let next_cursor = envelope.next_cursor();
        Ok(Page {
            has_more: envelope.body.has_more,
            next_cursor,
            items: envelope
                .body
                .messages
                .into_iter()
                .map(|message| message.into_record(stream_id))
                .collect(),
        })
    }

    async fn fetch_replies(
        &self,
        credential: &Credential,
        stream_id: &str,
        root_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Record>, RemoteError> {
        let mut query = vec![
            ("channel", stream_id.to_string()),
            ("ts", root_id.to_string()),
            ("limit", page_size_param(page_size)),
            ("inclusive", "true".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<SlackMessagesBody> = self
            .request_json(
                "conversations.replies",
                self.get("conversations.replies", credential).query(&query),
            )
            .await?;
        let next_cursor = envelope.next_cursor();
        Ok(Page {
            has_more: envelope.body.has_more,
            next_cursor,
            items: envelope
                .body
                .messages
                .into_iter()
                .map(|message| message.into_record(stream_id))
                .collect(),
        })
    }

    async fn get_actor(
        &self,
        credential: &Credential,
        actor_id: &str,
    ) -> Result<Option<Actor>, RemoteError> {
        let result: Result<SlackEnvelope<SlackUserBody>, RemoteError> = self
            .request_json(
                "users.info",
                self.get("users.info", credential)
                    .query(&[("user", actor_id)]),
            )
            .await;
        match result {
            Ok(envelope) => Ok(envelope.body.user.map(SlackUser::into_actor)),
            Err(RemoteError::Inaccessible { code }) if code == "user_not_found" => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn delete_record(
        &self,
        credential: &Credential,
        stream_id: &str,
        record_id: &str,
    ) -> Result<DeleteAck, RemoteError> {
        let payload = json!({
            "channel": stream_id,
            "ts": record_id,
            "as_user": true,
        });
        let result: Result<SlackEnvelope<SlackEmptyBody>, RemoteError> = self
            .request_json(
                "chat.delete",
                self.post("chat.delete", credential).json(&payload),
            )
            .await;
        match result {
            Ok(_) => Ok(DeleteAck::Deleted),
            Err(RemoteError::Gone { .. }) => Ok(DeleteAck::AlreadyGone),
            Err(error) => Err(error),
        }
    }

    async fn open_direct_stream(
        &self,
        credential: &Credential,
        other_actor_id: &str,
    ) -> Result<String, RemoteError> {
        let payload = json!({
            "users": other_actor_id,
            "return_im": true,
        });
        let envelope: SlackEnvelope<SlackConversationBody> = self
            .request_json(
                "conversations.open",
                self.post("conversations.open", credential).json(&payload),
            )
            .await?;
        envelope
            .body
            .channel
            .map(|conversation| conversation.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| RemoteError::Rejected {
                code: "missing_channel".to_string(),
            })
    }

    async fn list_stream_members(
        &self,
        credential: &Credential,
        stream_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page<String>, RemoteError> {
        let mut query = vec![
            ("channel", stream_id.to_string()),
            ("limit", page_size_param(page_size)),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let envelope: SlackEnvelope<SlackMembersBody> = self
            .request_json(
                "conversations.members",
                self.get("conversations.members", credential).query(&query),
            )
            .await?;
        let next_cursor = envelope.next_cursor();
        Ok(Page {
            has_more: next_cursor.is_some(),
            next_cursor,
            items: envelope.body.members,
        })
    }
}
