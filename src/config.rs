use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use tracing::trace;

use crate::util;

/// Longest accepted poll interval (one week)
pub const MAX_POLL_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest accepted retry cap (30 days)
pub const MAX_BACKOFF_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted budget for a single fetch (one hour)
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 60 * 60;

/// Subscriber persistence backend
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory only, subscribers are lost on restart
    #[serde(rename = "none")]
    None,

    /// JSON document replaced atomically on every change
    File {
        #[serde(default = "default_subscribers_path")]
        path: PathBuf,
    },

    /// SQLite database
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_subscribers_path(),
        }
    }
}

fn default_subscribers_path() -> PathBuf {
    PathBuf::from("./subscribers.json")
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./subscribers.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    /// Height known to exist, used as the starting point of the chain-tip search
    #[serde(default = "default_height_hint")]
    pub height_hint: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: default_provider_url(),
            api_key: String::new(),
            height_hint: default_height_hint(),
        }
    }
}

fn default_provider_url() -> String {
    String::from("https://nockblocks.com")
}

fn default_height_hint() -> u64 {
    51_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_url")]
    pub api_url: String,

    #[serde(default)]
    pub bot_token: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: default_telegram_url(),
            bot_token: String::new(),
        }
    }
}

fn default_telegram_url() -> String {
    String::from("https://api.telegram.org")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "default_interval")]
    pub poll_interval_secs: u64,

    /// Alert when the proofrate (MP/s) drops below this
    #[serde(default = "default_threshold")]
    pub proofrate_alert_threshold: f64,

    /// Extra MP/s above the threshold required before a recovery is announced
    #[serde(default)]
    pub recovery_margin: f64,

    /// Upper bound for the retry delay after failed polls
    pub backoff_max_secs: Option<u64>,

    /// Random spread applied to backoff sleeps, as a fraction of the delay
    #[serde(default = "default_jitter")]
    pub backoff_jitter: f64,

    /// Budget for one complete fetch, tip search included
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Chats that always receive alerts, seeded into the subscriber store on startup
    #[serde(default)]
    pub alert_chat_ids: Vec<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_interval(),
            proofrate_alert_threshold: default_threshold(),
            recovery_margin: 0.0,
            backoff_max_secs: None,
            backoff_jitter: default_jitter(),
            fetch_timeout_secs: default_fetch_timeout(),
            provider: ProviderConfig::default(),
            telegram: TelegramConfig::default(),
            alert_chat_ids: Vec::new(),
            storage: StorageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_interval() -> u64 {
    300
}

fn default_threshold() -> f64 {
    1.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_log_level() -> String {
    String::from("info")
}

impl Config {
    /// Load `.env`, the optional config file and the process environment, then validate.
    pub fn load(path: Option<&str>) -> anyhow::Result<Config> {
        if let Err(e) = dotenv::dotenv() {
            trace!("no .env file loaded: {e}");
        }

        let base = match path {
            Some(path) => read_config_file(path)?,
            None => Config::default(),
        };

        let config = base.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with values found through `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = util::parse_var::<String, _>(&lookup, util::TELEGRAM_BOT_TOKEN)? {
            self.telegram.bot_token = token;
        }
        if let Some(url) = util::parse_var::<String, _>(&lookup, util::TELEGRAM_API_URL)? {
            self.telegram.api_url = url;
        }
        if let Some(key) = util::parse_var::<String, _>(&lookup, util::NOCKBLOCKS_API_KEY)? {
            self.provider.api_key = key;
        }
        if let Some(url) = util::parse_var::<String, _>(&lookup, util::NOCKBLOCKS_URL)? {
            self.provider.url = url;
        }
        if let Some(threshold) = util::parse_var(&lookup, util::PROOFRATE_ALERT_THRESHOLD)? {
            self.proofrate_alert_threshold = threshold;
        }
        if let Some(margin) = util::parse_var(&lookup, util::RECOVERY_MARGIN)? {
            self.recovery_margin = margin;
        }
        if let Some(minutes) = util::parse_var::<u64, _>(&lookup, util::MONITOR_INTERVAL_MINUTES)? {
            self.poll_interval_secs = minutes.saturating_mul(60);
        }
        if let Some(secs) = util::parse_var(&lookup, util::POLL_INTERVAL_SECONDS)? {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = util::parse_var(&lookup, util::FETCH_TIMEOUT_SECONDS)? {
            self.fetch_timeout_secs = secs;
        }
        if let Some(raw) = lookup(util::ALERT_CHAT_IDS) {
            self.alert_chat_ids.extend(util::split_ids(&raw));
        }
        if let Some(path) = util::parse_var::<PathBuf, _>(&lookup, util::SUBSCRIBERS_FILE)? {
            self.storage = StorageConfig::File { path };
        }
        if let Some(level) = util::parse_var::<String, _>(&lookup, util::LOG_LEVEL)? {
            self.log_level = level;
        }

        Ok(self)
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.is_empty() {
            bail!("{} is not set", util::TELEGRAM_BOT_TOKEN);
        }
        if self.provider.api_key.is_empty() {
            bail!("{} is not set", util::NOCKBLOCKS_API_KEY);
        }
        ensure!(self.poll_interval_secs > 0, "poll interval must be positive");
        ensure!(
            self.poll_interval_secs <= MAX_POLL_INTERVAL_SECS,
            "poll interval must be at most {MAX_POLL_INTERVAL_SECS}s, got {}s",
            self.poll_interval_secs
        );
        if let Some(max) = self.backoff_max_secs {
            ensure!(
                max <= MAX_BACKOFF_SECS,
                "backoff cap must be at most {MAX_BACKOFF_SECS}s, got {max}s"
            );
        }
        ensure!(
            (1..=MAX_FETCH_TIMEOUT_SECS).contains(&self.fetch_timeout_secs),
            "fetch timeout must be within 1..={MAX_FETCH_TIMEOUT_SECS}s, got {}s",
            self.fetch_timeout_secs
        );
        ensure!(
            self.proofrate_alert_threshold.is_finite() && self.proofrate_alert_threshold >= 0.0,
            "proofrate alert threshold must be a non-negative number, got {}",
            self.proofrate_alert_threshold
        );
        ensure!(
            self.recovery_margin.is_finite() && self.recovery_margin >= 0.0,
            "recovery margin must be a non-negative number, got {}",
            self.recovery_margin
        );
        ensure!(
            (0.0..1.0).contains(&self.backoff_jitter),
            "backoff jitter must be within [0, 1), got {}",
            self.backoff_jitter
        );
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Retry cap, never shorter than the normal interval
    pub fn backoff_max(&self) -> Duration {
        let max = self
            .backoff_max_secs
            .unwrap_or_else(|| self.poll_interval_secs.saturating_mul(16));
        Duration::from_secs(max.max(self.poll_interval_secs))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
