//! Recognized configuration options (spec.md §6).

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ActivityTimeouts {
    pub load: Duration,
    pub execute: Duration,
    pub persist: Duration,
    pub deliver: Duration,
}

impl Default for ActivityTimeouts {
    fn default() -> Self {
        Self {
            load: Duration::from_secs(30),
            execute: Duration::from_secs(5 * 60),
            persist: Duration::from_secs(30),
            deliver: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// `llm.model`
    pub llm_model: String,
    /// `llm.max_retries_on_invalid_response`
    pub llm_max_retries_on_invalid_response: u32,

    pub brave_api_key: Option<String>,
    pub llm_api_base: String,
    pub llm_api_key: Option<String>,

    /// `executor.state_hash.canonical_keys`
    pub executor_canonical_state_hash: bool,

    pub workflow_activity_timeouts: ActivityTimeouts,

    /// `notifier.default_channel`
    pub notifier_default_channel: String,
    pub notifier_webhook_url: Option<String>,

    /// `schedule.min_interval`
    pub schedule_min_interval: chrono::Duration,

    /// How often the in-process `WorkflowRuntime` polls for due schedules.
    pub scheduler_poll_interval_secs: u64,

    pub http_port: u16,
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            llm_max_retries_on_invalid_response: std::env::var(
                "LLM_MAX_RETRIES_ON_INVALID_RESPONSE",
            )
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),

            brave_api_key: std::env::var("BRAVE_API_KEY").ok(),
            llm_api_base: std::env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),

            executor_canonical_state_hash: std::env::var("EXECUTOR_STATE_HASH_CANONICAL_KEYS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),

            workflow_activity_timeouts: ActivityTimeouts {
                load: env_duration_secs("WORKFLOW_TIMEOUT_LOAD_SECS", 30),
                execute: env_duration_secs("WORKFLOW_TIMEOUT_EXECUTE_SECS", 5 * 60),
                persist: env_duration_secs("WORKFLOW_TIMEOUT_PERSIST_SECS", 30),
                deliver: env_duration_secs("WORKFLOW_TIMEOUT_DELIVER_SECS", 60),
            },

            notifier_default_channel: std::env::var("NOTIFIER_DEFAULT_CHANNEL")
                .unwrap_or_else(|_| "email".to_string()),
            notifier_webhook_url: std::env::var("NOTIFIER_WEBHOOK_URL").ok(),

            schedule_min_interval: chrono::Duration::seconds(
                std::env::var("SCHEDULE_MIN_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(60),
            ),

            scheduler_poll_interval_secs: std::env::var("SCHEDULER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            http_port: std::env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
        })
    }
}
