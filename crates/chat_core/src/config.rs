use std::{collections::HashMap, fs, time::Duration};

use anyhow::{anyhow, Result};
use url::Url;

/// Client-side knobs for the synchronization core. Layered like the rest
/// of the deployment's config: defaults, then `chat.toml`, then
/// environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST API, e.g. `http://localhost:5000`.
    pub api_base: String,
    /// Explicit websocket base; when absent it is derived from `api_base`
    /// by scheme rewrite (`https` -> `wss`, `http` -> `ws`).
    pub ws_base: Option<String>,
    /// Where the unread ledger persists. The in-memory default is
    /// session-scoped; point it at a file to survive restarts.
    pub database_url: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_reconnect_attempts: u32,
    pub unread_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:5000".into(),
            ws_base: None,
            database_url: storage::DEFAULT_SESSION_URL.into(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            unread_poll_interval: Duration::from_secs(30),
        }
    }
}

pub fn load_config() -> SyncConfig {
    let mut config = SyncConfig::default();

    if let Ok(raw) = fs::read_to_string("chat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_base") {
                config.api_base = v.clone();
            }
            if let Some(v) = file_cfg.get("ws_base") {
                config.ws_base = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("database_url") {
                config.database_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_API_BASE") {
        config.api_base = v;
    }
    if let Ok(v) = std::env::var("CHAT_WS_BASE") {
        config.ws_base = Some(v);
    }
    if let Ok(v) = std::env::var("CHAT_DATABASE_URL") {
        config.database_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_BACKOFF_INITIAL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            config.initial_backoff = Duration::from_millis(parsed);
        }
    }
    if let Ok(v) = std::env::var("CHAT_BACKOFF_MAX_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            config.max_backoff = Duration::from_millis(parsed);
        }
    }
    if let Ok(v) = std::env::var("CHAT_MAX_RECONNECT_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            config.max_reconnect_attempts = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_UNREAD_POLL_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            config.unread_poll_interval = Duration::from_secs(parsed);
        }
    }

    config
}

impl SyncConfig {
    /// Resolves the socket endpoint. An explicit `ws_base` wins; otherwise
    /// the API base is validated and its scheme rewritten.
    pub fn websocket_url(&self) -> Result<String> {
        if let Some(ws_base) = &self.ws_base {
            return Ok(ws_base.clone());
        }
        let parsed = Url::parse(&self.api_base)
            .map_err(|err| anyhow!("invalid api_base {:?}: {err}", self.api_base))?;
        match parsed.scheme() {
            "https" => Ok(self.api_base.replacen("https://", "wss://", 1)),
            "http" => Ok(self.api_base.replacen("http://", "ws://", 1)),
            other => Err(anyhow!("api_base must be http(s), got {other}://")),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
