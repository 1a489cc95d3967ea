use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use sweep_slack::DEFAULT_SLACK_API_BASE;

pub(crate) fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

pub(crate) fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| format!("expected an RFC 3339 timestamp: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "slack-sweep",
    about = "Export or bulk-delete Slack conversation history within API rate limits",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "SLACK_SWEEP_TOKEN",
        hide_env_values = true,
        help = "Slack user token used for every API call"
    )]
    pub token: String,

    #[arg(
        long = "api-base",
        env = "SLACK_SWEEP_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE,
        help = "Base URL for the Slack Web API"
    )]
    pub api_base: String,

    #[arg(
        long = "request-timeout-ms",
        env = "SLACK_SWEEP_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for a single HTTP request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "history-interval-ms",
        env = "SLACK_SWEEP_HISTORY_INTERVAL_MS",
        help = "Override the minimum spacing before history page requests"
    )]
    pub history_interval_ms: Option<u64>,

    #[arg(
        long = "mutation-interval-ms",
        env = "SLACK_SWEEP_MUTATION_INTERVAL_MS",
        help = "Override the minimum spacing before delete requests"
    )]
    pub mutation_interval_ms: Option<u64>,

    #[arg(
        long = "stream-pause-ms",
        env = "SLACK_SWEEP_STREAM_PAUSE_MS",
        help = "Override the pause between conversations for exports and deletes"
    )]
    pub stream_pause_ms: Option<u64>,

    #[arg(
        long = "default-limit",
        env = "SLACK_SWEEP_DEFAULT_LIMIT",
        default_value_t = 1_000,
        value_parser = parse_positive_usize,
        help = "Record cap used when a command does not pass --limit"
    )]
    pub default_limit: usize,

    #[arg(
        long = "operation-timeout-ms",
        env = "SLACK_SWEEP_OPERATION_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Wall-clock deadline for the whole operation; partial results are reported"
    )]
    pub operation_timeout_ms: Option<u64>,

    #[arg(
        long = "no-jitter",
        env = "SLACK_SWEEP_NO_JITTER",
        default_value_t = false,
        help = "Disable random jitter on rate-limit backoff"
    )]
    pub no_jitter: bool,

    #[arg(short, long, default_value_t = false, help = "Log progress at info level")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: SweepCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum SweepCommand {
    /// Export a channel, or every direct conversation of an actor, as JSON.
    Export(ExportArgs),
    /// Delete matching records from one conversation.
    DeleteInStream(DeleteInStreamArgs),
    /// Delete an actor's records from every conversation they belong to.
    DeleteAll(ActorDeleteArgs),
    /// Delete an actor's records from their direct and group-direct conversations.
    DeleteDirect(ActorDeleteArgs),
    /// Delete an actor's records from conversations shared with another actor.
    DeleteBetween(DeleteBetweenArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub(crate) struct WindowArgs {
    #[arg(long, value_parser = parse_rfc3339, help = "Inclusive lower time bound (RFC 3339)")]
    pub oldest: Option<DateTime<Utc>>,

    #[arg(long, value_parser = parse_rfc3339, help = "Inclusive upper time bound (RFC 3339)")]
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Args)]
pub(crate) struct ExportArgs {
    #[arg(
        long,
        conflicts_with = "actor",
        required_unless_present = "actor",
        help = "Channel id to export"
    )]
    pub channel: Option<String>,

    #[arg(long, help = "Actor id whose direct conversations are exported")]
    pub actor: Option<String>,

    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long, value_parser = parse_positive_usize, help = "Cap on exported top-level records")]
    pub limit: Option<usize>,

    #[arg(long = "actor-filter", help = "Keep only records written by this actor id")]
    pub actor_filter: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct DeleteFilterArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long, value_parser = parse_positive_usize, help = "Per-conversation cap on delete attempts")]
    pub limit: Option<usize>,

    #[arg(
        long = "include-thread-replies",
        default_value_t = false,
        help = "Also delete matching replies under matching thread roots"
    )]
    pub include_thread_replies: bool,
}

#[derive(Debug, Args)]
pub(crate) struct DeleteInStreamArgs {
    #[arg(long, help = "Conversation id")]
    pub stream: String,

    #[arg(long, help = "Only delete records written by this actor id")]
    pub actor: Option<String>,

    #[command(flatten)]
    pub filters: DeleteFilterArgs,
}

#[derive(Debug, Args)]
pub(crate) struct ActorDeleteArgs {
    #[arg(long, help = "Actor id whose records are deleted")]
    pub actor: String,

    #[command(flatten)]
    pub filters: DeleteFilterArgs,
}

#[derive(Debug, Args)]
pub(crate) struct DeleteBetweenArgs {
    #[arg(long, help = "Actor id whose records are deleted")]
    pub actor: String,

    #[arg(long = "other-actor", help = "Counterpart actor id")]
    pub other_actor: String,

    #[command(flatten)]
    pub filters: DeleteFilterArgs,
}
