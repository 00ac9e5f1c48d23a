//! Core error types for wtmux

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use wtmux_proto::{ProtocolError, SessionErrorCode, StreamErrorCode};

/// Top-level error type returned by the session layer
#[derive(Error, Debug)]
pub enum MuxError {
    /// The session is closed; every caller observes the same close reason
    #[error(transparent)]
    Session(#[from] ConnectionError),

    /// A stream was reset with an application error code
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Transport error passed through untranslated
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stream reset with a code outside the WebTransport range
    #[error("Stream reset with unmappable error code {code:#x}: {source}")]
    UnmappedStreamReset {
        code: u64,
        #[source]
        source: ProtocolError,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MuxError {
    /// Whether this is a deadline expiry rather than a failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, MuxError::Transport(TransportError::Timeout))
    }

    /// The session close reason, if this error reports one
    pub fn as_session_close(&self) -> Option<&ConnectionError> {
        match self {
            MuxError::Session(err) => Some(err),
            _ => None,
        }
    }

    /// The stream reset code, if this error reports one
    pub fn as_stream_error(&self) -> Option<&StreamError> {
        match self {
            MuxError::Stream(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors reported by the underlying transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Stream was reset; `code` is the raw HTTP/3 error code
    #[error("Stream reset with code {code:#x} (remote: {remote})")]
    StreamReset { code: u64, remote: bool },

    /// Read or write deadline expired
    #[error("Deadline exceeded")]
    Timeout,

    /// Write attempted after the stream was finished
    #[error("Stream already closed")]
    StreamClosed,

    /// Peer's stream limit is exhausted and the open would block
    #[error("Stream limit reached")]
    StreamLimitReached,

    /// Stream ended before the expected number of bytes arrived
    #[error("Stream ended unexpectedly")]
    UnexpectedEnd,

    /// Connection is gone
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}

/// A stream reset carrying an application error code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Stream reset with error code {code} (remote: {remote})")]
pub struct StreamError {
    /// Application error code
    pub code: StreamErrorCode,
    /// Whether the peer reset the stream
    pub remote: bool,
}

impl StreamError {
    /// Create a new stream error
    pub fn new(code: StreamErrorCode, remote: bool) -> Self {
        Self { code, remote }
    }
}

/// Reason a session was closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionError {
    /// Whether the peer closed the session
    pub remote: bool,
    /// Application error code
    pub error_code: SessionErrorCode,
    /// Human-readable reason
    pub message: String,
}

impl ConnectionError {
    /// A close initiated by the local application
    pub fn local(error_code: SessionErrorCode, message: impl Into<String>) -> Self {
        Self {
            remote: false,
            error_code,
            message: message.into(),
        }
    }

    /// A close signalled by the peer
    pub fn remote(error_code: SessionErrorCode, message: impl Into<String>) -> Self {
        Self {
            remote: true,
            error_code,
            message: message.into(),
        }
    }

    /// The session ended without a close capsule (stream or connection loss)
    pub fn remote_unspecified() -> Self {
        Self {
            remote: true,
            ..Default::default()
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.remote { "peer" } else { "local endpoint" };
        write!(f, "Session closed by {} (code {})", side, self.error_code)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectionError {}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
