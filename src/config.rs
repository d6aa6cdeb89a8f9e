// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : ledger_sync — buyer ledger & purchase records over a sheet service
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Reads settings from the environment (and `.env`), with defaults.
          CLI flags in main.rs override what is loaded here.
=============================================================================
*/
use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;
use url::Url;

use crate::error::ConfigError;
use crate::transport::Channel;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8787/exec";
pub const DEFAULT_CALLBACK_PREFIX: &str = "ledgerCallback";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Channel from env; unknown values fall back to `default`.
pub fn channel_from_env(key: &str, default: Channel) -> Channel {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Channel::parse(&v).unwrap_or_else(|| {
            warn!(%key, value = %v, "unknown channel, using default");
            default
        }),
        _ => default,
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // sheet endpoint
    pub endpoint: String,
    pub primary: Channel,
    pub timeout_secs: u64, // 0 = tanpa timeout
    pub callback_prefix: String,

    // files/metrics
    pub record_file: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Args {
    pub fn client_settings(&self) -> Result<ClientSettings, ConfigError> {
        let mut s = ClientSettings::new(&self.endpoint)?;
        s.primary = self.primary;
        s.timeout = timeout_from_secs(self.timeout_secs);
        s.callback_prefix = self.callback_prefix.clone();
        Ok(s)
    }
}

/// What `RemoteLedgerClient` needs.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub endpoint: Url,
    pub primary: Channel,
    pub timeout: Option<Duration>,
    pub callback_prefix: String,
}

impl ClientSettings {
    pub fn new(endpoint: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            primary: Channel::Callback,
            timeout: timeout_from_secs(DEFAULT_TIMEOUT_SECS),
            callback_prefix: DEFAULT_CALLBACK_PREFIX.to_string(),
        })
    }

    pub fn with_primary(mut self, primary: Channel) -> Self {
        self.primary = primary;
        self
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::Endpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Endpoint {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

pub fn load() -> Args {
    // Pastikan .env dibaca (LEDGER_ENDPOINT, RECORD_FILE, dll)
    let _ = dotenv();

    let endpoint = env::var("LEDGER_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
    let primary = channel_from_env("LEDGER_PRIMARY", Channel::Callback);
    let timeout_secs = env::var("LEDGER_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let callback_prefix = env::var("LEDGER_CALLBACK_PREFIX")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CALLBACK_PREFIX.to_string());

    let record_file = env::var("RECORD_FILE").ok().filter(|s| !s.trim().is_empty());
    let metrics_port = env::var("METRICS_PORT").ok().and_then(|s| s.trim().parse().ok());

    Args { endpoint, primary, timeout_secs, callback_prefix, record_file, metrics_port }
}
