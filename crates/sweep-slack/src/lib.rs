//! Slack Web API adapter for the sweep engine.

mod slack_api_client;
mod slack_helpers;


pub use slack_api_client::{SlackApiConfig, SlackWebApiClient, DEFAULT_SLACK_API_BASE};
