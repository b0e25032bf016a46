use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::provider::SendPolicy;

/// Tuning knobs for the delivery dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Recipients claimed per dispatch tick.
    pub batch_size: usize,
    /// Per-attempt provider send timeout.
    pub send_timeout: Duration,
    /// Total send attempts per recipient, including the first.
    pub max_send_attempts: u32,
    /// How often the polling loop wakes to start due broadcasts and tick
    /// active ones.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            send_timeout: Duration::from_secs(10),
            max_send_attempts: 2,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let batch_size = env::var("MEGAPHONE_BATCH_SIZE")
            .map(|raw| parse_positive(&raw, "MEGAPHONE_BATCH_SIZE"))
            .unwrap_or(Ok(defaults.batch_size))?;

        let send_timeout = env::var("MEGAPHONE_SEND_TIMEOUT_SECS")
            .map(|raw| parse_secs(&raw, "MEGAPHONE_SEND_TIMEOUT_SECS"))
            .unwrap_or(Ok(defaults.send_timeout))?;

        let max_send_attempts = env::var("MEGAPHONE_MAX_SEND_ATTEMPTS")
            .map(|raw| {
                parse_positive(&raw, "MEGAPHONE_MAX_SEND_ATTEMPTS").map(|n| n as u32)
            })
            .unwrap_or(Ok(defaults.max_send_attempts))?;

        let poll_interval = env::var("MEGAPHONE_POLL_INTERVAL_SECS")
            .map(|raw| parse_secs(&raw, "MEGAPHONE_POLL_INTERVAL_SECS"))
            .unwrap_or(Ok(defaults.poll_interval))?;

        Ok(Self {
            batch_size,
            send_timeout,
            max_send_attempts,
            poll_interval,
        })
    }

    /// The per-recipient retry policy derived from this config.
    pub fn send_policy(&self) -> SendPolicy {
        SendPolicy {
            max_attempts: self.max_send_attempts,
            timeout: self.send_timeout,
        }
    }
}

fn parse_positive(raw: &str, var: &str) -> Result<usize> {
    let value = raw
        .parse::<usize>()
        .with_context(|| format!("{var} must be a valid number"))?;
    if value == 0 {
        anyhow::bail!("{var} must be greater than zero");
    }
    Ok(value)
}

fn parse_secs(raw: &str, var: &str) -> Result<Duration> {
    parse_positive(raw, var).map(|secs| Duration::from_secs(secs as u64))
}
