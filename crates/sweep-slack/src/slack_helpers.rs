use std::time::Duration;

use chrono::{DateTime, Utc};
use sweep_engine::RemoteError;

/// Reads `Retry-After` as delta-seconds or an HTTP date.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)))
}

pub(crate) fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

/// Maps a Slack `error` code from an `ok: false` envelope.
pub(crate) fn classify_slack_error(code: &str, retry_after: Option<Duration>) -> RemoteError {
    let code = code.trim();
    match code {
        "invalid_auth" | "not_authed" | "token_revoked" | "token_expired"
        | "account_inactive" | "missing_scope" | "no_permission" | "org_login_required"
        | "ekm_access_denied" => RemoteError::Unauthorized {
            code: code.to_string(),
        },
        "not_in_channel" | "channel_not_found" | "access_denied" | "user_not_found"
        | "is_archived" | "method_not_supported_for_channel_type" | "team_access_not_granted" => {
            RemoteError::Inaccessible {
                code: code.to_string(),
            }
        }
        "message_not_found" | "thread_not_found" => RemoteError::Gone {
            code: code.to_string(),
        },
        "ratelimited" | "rate_limited" => RemoteError::RateLimited { retry_after },
        "" => RemoteError::Rejected {
            code: "unknown_error".to_string(),
        },
        _ => RemoteError::Rejected {
            code: code.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_classify_slack_error_covers_each_family() {
        assert!(matches!(
            classify_slack_error("token_revoked", None),
            RemoteError::Unauthorized { .. }
        ));
        assert!(matches!(
            classify_slack_error("not_in_channel", None),
            RemoteError::Inaccessible { .. }
        ));
        assert!(matches!(
            classify_slack_error("message_not_found", None),
            RemoteError::Gone { .. }
        ));
        assert_eq!(
            classify_slack_error("ratelimited", Some(Duration::from_secs(3))),
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            classify_slack_error("cant_delete_message", None),
            RemoteError::Rejected {
                code: "cant_delete_message".to_string()
            }
        );
    }

    #[test]
    fn unit_parse_retry_after_accepts_seconds_and_ignores_garbage() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static(" 12 "),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("soon"),
        );
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn unit_truncate_for_error_appends_ellipsis() {
        assert_eq!(truncate_for_error("abc", 5), "abc");
        assert_eq!(truncate_for_error("abcdef", 3), "abc...");
    }
}
