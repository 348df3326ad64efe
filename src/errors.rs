/// Error taxonomy for the RouterOS API client.
///
/// Every fallible operation in this crate returns [`Error`]; there is no
/// retry or fallback hidden inside the core — callers decide what to do
/// with each kind.
use std::collections::HashMap;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// A structured error, tagged with a [`Kind`] and carrying whatever detail
/// the server (or transport) gave us.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// DNS, TCP dial, TLS handshake, or any other pre-auth transport error.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// The server replied `!trap` to a credentialed `/login`.
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// Application-level error from a non-login command. The connection
    /// that produced this remains usable.
    #[error("trap: {message}")]
    Trap {
        message: String,
        details: HashMap<String, String>,
    },

    /// The server signaled `!fatal`; the connection that produced this is
    /// dead and must not be reused.
    #[error("fatal: {message}")]
    Fatal {
        message: String,
        details: HashMap<String, String>,
    },

    /// A configured deadline elapsed.
    #[error("timed out: {message}")]
    Timeout { message: String },

    /// The caller invoked `close`, or the transport closed between requests.
    #[error("connection closed: {message}")]
    Closed { message: String },

    /// Length prefix out of range, truncated sentence, missing block
    /// terminator, malformed salt, or any other wire-format violation.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl Error {
    pub fn kind(&self) -> Kind {
        match self {
            Error::ConnectionFailed { .. } => Kind::ConnectionFailed,
            Error::AuthFailed { .. } => Kind::AuthFailed,
            Error::Trap { .. } => Kind::Trap,
            Error::Fatal { .. } => Kind::Fatal,
            Error::Timeout { .. } => Kind::Timeout,
            Error::Closed { .. } => Kind::Closed,
            Error::Protocol { .. } => Kind::Protocol,
        }
    }

    /// True when this error kind means the worker that produced it must be
    /// discarded rather than checked back in to a pool.
    pub fn is_fatal_to_worker(&self) -> bool {
        !matches!(self, Error::Trap { .. })
    }

    pub(crate) fn connection_failed(message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        Error::AuthFailed {
            message: message.into(),
        }
    }

    pub(crate) fn trap(message: impl Into<String>, details: HashMap<String, String>) -> Self {
        Error::Trap {
            message: message.into(),
            details,
        }
    }

    pub(crate) fn fatal(message: impl Into<String>, details: HashMap<String, String>) -> Self {
        Error::Fatal {
            message: message.into(),
            details,
        }
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout {
            message: message.into(),
        }
    }

    pub(crate) fn closed(message: impl Into<String>) -> Self {
        Error::Closed {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }
}

/// The closed set of error kinds this client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    ConnectionFailed,
    AuthFailed,
    Trap,
    Fatal,
    Timeout,
    Closed,
    Protocol,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::ConnectionFailed => "connection_failed",
            Kind::AuthFailed => "auth_failed",
            Kind::Trap => "trap",
            Kind::Fatal => "fatal",
            Kind::Timeout => "timeout",
            Kind::Closed => "closed",
            Kind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}
