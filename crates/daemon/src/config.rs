//! Daemon configuration from environment variables
//!
//! Invalid values are fatal at startup: a misconfigured valve must fail
//! fast, not run with silently substituted numbers.

use std::time::Duration;

use anyhow::{bail, Context, Result};

const DEFAULT_RATE: u32 = 5;
const DEFAULT_WINDOW_SECS: u64 = 1;
const DEFAULT_MAX_BACKLOG: usize = 1024;
const DEFAULT_BROKER_URL: &str = "local:";
const DEFAULT_GROUP_ID: &str = "relay";
const DEFAULT_TOPICS: &str = "work";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub rate: u32,
    pub window: Duration,
    pub max_backlog: usize,
    pub broker_url: String,
    pub group_id: String,
    pub topics: Vec<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::parse(|key| std::env::var(key).ok())
    }

    /// Parse from an arbitrary variable source (testable)
    pub fn parse(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rate = parse_or("SLUICE_RATE", DEFAULT_RATE, &var)?;
        let window_secs = parse_or("SLUICE_WINDOW_SECS", DEFAULT_WINDOW_SECS, &var)?;
        let max_backlog = parse_or("SLUICE_MAX_BACKLOG", DEFAULT_MAX_BACKLOG, &var)?;

        let topics: Vec<String> = var("SLUICE_TOPICS")
            .unwrap_or_else(|| DEFAULT_TOPICS.to_string())
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if topics.is_empty() {
            bail!("SLUICE_TOPICS must name at least one topic");
        }

        Ok(Self {
            rate,
            window: Duration::from_secs(window_secs),
            max_backlog,
            broker_url: var("SLUICE_BROKER_URL").unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
            group_id: var("SLUICE_GROUP_ID").unwrap_or_else(|| DEFAULT_GROUP_ID.to_string()),
            topics,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    default: T,
    var: impl Fn(&str) -> Option<String>,
) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
