use std::str::FromStr;

use anyhow::Context;

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

pub const TELEGRAM_API_URL: &str = "TELEGRAM_API_URL";

pub const NOCKBLOCKS_API_KEY: &str = "NOCKBLOCKS_API_KEY";

pub const NOCKBLOCKS_URL: &str = "NOCKBLOCKS_URL";

pub const PROOFRATE_ALERT_THRESHOLD: &str = "PROOFRATE_ALERT_THRESHOLD";

pub const RECOVERY_MARGIN: &str = "RECOVERY_MARGIN";

pub const POLL_INTERVAL_SECONDS: &str = "POLL_INTERVAL_SECONDS";

/// Older deployments configure the interval in minutes
pub const MONITOR_INTERVAL_MINUTES: &str = "MONITOR_INTERVAL_MINUTES";

pub const FETCH_TIMEOUT_SECONDS: &str = "FETCH_TIMEOUT_SECONDS";

pub const ALERT_CHAT_IDS: &str = "ALERT_CHAT_IDS";

pub const SUBSCRIBERS_FILE: &str = "SUBSCRIBERS_FILE";

pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Read and parse an optional variable; blank values count as unset.
pub fn parse_var<T, F>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(None),
    }
}

/// Split a comma-separated id list, dropping empty entries
pub fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}
