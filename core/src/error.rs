//! Error types for the request lifecycle.
//!
//! # Design
//! `Precondition` is the only variant returned synchronously from
//! `Client::dispatch`; every other variant reaches the caller through the
//! completion callback (wrapped in a [`Failure`] that may carry the response
//! metadata) or through the deferred adapter. `Status` is produced only by
//! the deferred adapter, which treats non-2xx responses as failures.

use std::{error::Error as StdError, fmt, io};

use crate::response::{ResponseBody, ResponseMetadata};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request description was unusable. Reported before any I/O.
    #[error("invalid request: {0}")]
    Precondition(String),

    /// The transport failed after dispatch (connect, reset, TLS, body stream)
    /// or the request was aborted by the caller.
    #[error("{message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Either the overall deadline or the idle timer fired.
    #[error("client request timeout")]
    Timeout { kind: TimeoutKind },

    /// JSON was requested but the response body did not parse.
    #[error("invalid JSON in response body: {0}")]
    ResponseParse(#[source] serde_json::Error),

    /// The deferred adapter received a non-2xx status.
    #[error("status code {}", .response.status.as_u16())]
    Status {
        response: Box<ResponseMetadata>,
        body: Box<ResponseBody>,
    },
}

/// Coarse classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    /// Cancelled through `RequestHandle::abort`.
    Aborted,
    Dns,
    Tls,
    Connect,
    /// The response body stream failed after the head arrived.
    Body,
    Other,
}

/// Which of the two timers ended the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Total elapsed time since dispatch.
    Deadline,
    /// No transport activity for the configured duration.
    Idle,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::Aborted => "aborted",
            TransportErrorKind::Dns => "dns lookup failed",
            TransportErrorKind::Tls => "tls failure",
            TransportErrorKind::Connect => "connect failed",
            TransportErrorKind::Body => "response body failed",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(name)
    }
}

impl Error {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Error::Precondition(message.into())
    }

    pub(crate) fn aborted() -> Self {
        Error::Transport {
            kind: TransportErrorKind::Aborted,
            message: "request aborted".to_string(),
            source: None,
        }
    }

    pub(crate) fn transport(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Error::Transport {
            kind,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Classify a `reqwest` failure by walking its source chain.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = match io_kind(&err) {
            Some(io::ErrorKind::ConnectionRefused) => TransportErrorKind::ConnectionRefused,
            Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {
                TransportErrorKind::ConnectionReset
            }
            _ if err.is_body() || err.is_decode() => TransportErrorKind::Body,
            _ if err.is_connect() && mentions(&err, &["dns error", "failed to lookup"]) => {
                TransportErrorKind::Dns
            }
            _ if err.is_connect() && mentions(&err, &["certificate", "tls"]) => {
                TransportErrorKind::Tls
            }
            _ if err.is_connect() => TransportErrorKind::Connect,
            _ => TransportErrorKind::Other,
        };
        Error::transport(kind, err)
    }

    /// Node-style error code, where one applies.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Error::Timeout { .. } => Some("ECONNRESET"),
            Error::Transport { kind, source, .. } => match kind {
                TransportErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
                TransportErrorKind::ConnectionReset | TransportErrorKind::Aborted => {
                    Some("ECONNRESET")
                }
                TransportErrorKind::Dns => Some("ENOTFOUND"),
                _ => match source.as_deref().and_then(|s| io_kind(s)) {
                    Some(io::ErrorKind::TimedOut) => Some("ETIMEDOUT"),
                    _ => None,
                },
            },
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                kind: TransportErrorKind::Aborted,
                ..
            }
        )
    }
}

/// Terminal failure handed to the completion callback.
///
/// `response` is set when the response head had already arrived before the
/// failure (always the case for [`Error::ResponseParse`]).
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct Failure {
    pub error: Error,
    pub response: Option<ResponseMetadata>,
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        failure.error
    }
}

fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Some(io.kind());
        }
        current = err.source();
    }
    None
}

fn mentions(err: &(dyn StdError + 'static), needles: &[&str]) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        let text = err.to_string().to_ascii_lowercase();
        if needles.iter().any(|needle| text.contains(needle)) {
            return true;
        }
        current = err.source();
    }
    false
}
