// ===============================
// src/error.rs
// ===============================
use thiserror::Error;

use crate::transport::Channel;

/// What went wrong talking to the sheet service.
///
/// - `Transport`: network / HTTP / unparseable body on every channel tried.
/// - `Service`: the service answered with an `error` (or `success: false`).
/// - `EmptyAck`: a write came back without an acknowledgement.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("transport failed on every channel: {}", format_attempts(.0))]
    Transport(Vec<TransportFailure>),

    #[error("service error: {0}")]
    Service(String),

    #[error("empty acknowledgement for {0}")]
    EmptyAck(String),

    #[error("cannot decode payload: {0}")]
    Decode(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl SyncError {
    /// Failed on both transports (as opposed to a definitive service answer).
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

/// One failed attempt on one channel.
#[derive(Debug, Clone, Error)]
#[error("{channel}: {reason}")]
pub struct TransportFailure {
    pub channel: Channel,
    pub reason: String,
}

fn format_attempts(attempts: &[TransportFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint url {url}: {reason}")]
    Endpoint { url: String, reason: String },

    #[error("invalid value for {key}: {value}")]
    Value { key: &'static str, value: String },

    #[error("cannot build http client: {0}")]
    HttpClient(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
