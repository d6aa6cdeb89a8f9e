// ===============================
// src/transport.rs
// ===============================
//
// Two ways of reaching the same sheet endpoint:
// - Callback : GET ...&callback=<name>, body is `name(<json>)`
// - Direct   : GET ... (no callback), body is plain JSON
//
// Both are plain query-string GETs; the service takes no request body.
//
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::callbacks::CallbackRegistry;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Callback,
    Direct,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Callback => "callback",
            Channel::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "callback" | "jsonp" | "script" => Some(Channel::Callback),
            "direct" | "fetch" | "json" => Some(Channel::Direct),
            _ => None,
        }
    }

    /// The channel tried when this one fails.
    pub fn other(&self) -> Channel {
        match self {
            Channel::Callback => Channel::Direct,
            Channel::Direct => Channel::Callback,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest body excerpt carried into an error message.
const BODY_EXCERPT: usize = 200;

pub struct SheetTransport {
    http: reqwest::Client,
    endpoint: Url,
    callbacks: CallbackRegistry,
}

impl SheetTransport {
    pub fn new(
        endpoint: Url,
        timeout: Option<Duration>,
        callback_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { http, endpoint, callbacks: CallbackRegistry::new(callback_prefix) })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Endpoint + query. Pairs are percent-encoded in the order given.
    pub fn url_for(&self, params: &[(String, String)], callback: Option<&str>) -> String {
        let mut pairs: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        if let Some(cb) = callback {
            pairs.push(format!("callback={}", urlencoding::encode(cb)));
        }
        let base = self.endpoint.as_str();
        let sep = if self.endpoint.query().is_some() { '&' } else { '?' };
        format!("{}{}{}", base, sep, pairs.join("&"))
    }

    /// One attempt on one channel. Any failure comes back as a message; the
    /// caller decides whether to fall back.
    pub async fn fetch(
        &self,
        channel: Channel,
        req_id: u64,
        params: &[(String, String)],
    ) -> Result<Value, String> {
        match channel {
            Channel::Callback => self.fetch_callback(req_id, params).await,
            Channel::Direct => self.fetch_direct(params).await,
        }
    }

    async fn fetch_callback(&self, req_id: u64, params: &[(String, String)]) -> Result<Value, String> {
        let mut pending = self.callbacks.register(req_id);
        let url = self.url_for(params, Some(pending.name()));
        debug!(req_id, callback = pending.name(), "callback request");
        let body = self.get_text(&url).await?;
        self.callbacks.deliver(&body)?;
        pending.take()
    }

    async fn fetch_direct(&self, params: &[(String, String)]) -> Result<Value, String> {
        let url = self.url_for(params, None);
        let body = self.get_text(&url).await?;
        serde_json::from_str::<Value>(body.trim()).map_err(|e| format!("json body: {e}"))
    }

    async fn get_text(&self, url: &str) -> Result<String, String> {
        let rsp = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let code = rsp.status();
        let body = rsp.text().await.map_err(|e| e.to_string())?;
        if !code.is_success() {
            let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
            return Err(format!("HTTP {code}: {excerpt}"));
        }
        Ok(body)
    }
}
