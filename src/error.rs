//! Driver Error Types
//!
//! Errors are split into two families so callers can tell "never reached the
//! server" ([`TransportError`]) from "reached the server but got garbage"
//! ([`DecodeError`]).

use thiserror::Error;

/// Main error type for driver operations
#[derive(Debug, Error)]
pub enum DriverError {
    /// The request never produced a usable response
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body could not be decoded as requested
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures on the way to (or back from) the remote server
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP/TLS connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Request or connect timeout elapsed
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// SOCKS5 negotiation or tunnel failure
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Any other failure while sending or receiving
    #[error("Request failed: {0}")]
    Request(String),

    /// The driver was closed before the operation completed
    #[error("Driver is closed")]
    Closed,

    /// The target URL could not be parsed
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),
}

/// SOCKS5 handshake failures
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The proxy itself could not be reached
    #[error("cannot reach proxy {addr}: {reason}")]
    Unreachable { addr: String, reason: String },

    /// The proxy refused every authentication method offered
    #[error("proxy accepted none of the offered authentication methods")]
    NoAcceptableMethod,

    /// Username/password sub-negotiation failed
    #[error("proxy rejected credentials (status {0:#04x})")]
    AuthRejected(u8),

    /// CONNECT was refused; carries the SOCKS5 reply code
    #[error("CONNECT to {target} failed: {} ({code:#04x})", describe_reply(.code))]
    ConnectFailed { target: String, code: u8 },

    /// The proxy answered with something that is not SOCKS5
    #[error("malformed proxy reply: {0}")]
    Protocol(String),

    /// Failure on an already negotiated tunnel
    #[error("tunnel failure: {0}")]
    Tunnel(String),
}

/// Failures decoding a response body
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Body is JSON, but not an object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Body is not valid UTF-8 text
    #[error("response body is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn describe_reply(code: &u8) -> &'static str {
    reply_message(*code)
}

/// Human readable text for a SOCKS5 CONNECT reply code
pub fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

impl DriverError {
    /// Whether this error came from the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }

    /// Whether this error came from decoding the body
    pub fn is_decode(&self) -> bool {
        matches!(self, DriverError::Decode(_))
    }

    /// Whether the operation failed because the driver was closed
    pub fn is_closed(&self) -> bool {
        matches!(self, DriverError::Transport(TransportError::Closed))
    }
}

impl From<ProxyError> for DriverError {
    fn from(err: ProxyError) -> Self {
        DriverError::Transport(TransportError::Proxy(err))
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Decode(DecodeError::Json(err))
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string()).into()
        } else if err.is_connect() {
            TransportError::Connect(err.to_string()).into()
        } else if err.is_builder() {
            TransportError::InvalidUrl(err.to_string()).into()
        } else {
            TransportError::Request(err.to_string()).into()
        }
    }
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;
