//! Error types for the connection acceptance and dispatch core.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure domains for the accept/dispatch core.
///
/// Transient I/O (would-block, interrupted) never reaches this type — it is
/// absorbed by [`crate::io::IoOutcome`] and turned into a reschedule instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unrecoverable socket I/O (closed peer, broken pipe, bad fd).
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// TLS handshake or record-layer failure.
    #[cfg(feature = "tls")]
    #[error("TLS error: {source}")]
    Tls {
        #[from]
        source: openssl::ssl::Error,
    },

    /// Malformed configuration (bad listener entry, missing cert, bad TOML).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Protocol-level rejection: unknown protocol token, unparseable headers,
    /// buffer filled without a terminator, missing URI slash.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Authentication/authorization rejection (banned IP, bad credentials,
    /// blocked user-agent).
    #[error("authorization error: {message}")]
    Auth { message: String },

    /// Listen-socket lifecycle failure (bind, listen, socket option).
    #[error("listener error: {message}")]
    Listener { message: String },

    /// Anything else.
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn listener<S: Into<String>>(message: S) -> Self {
        Self::Listener { message: message.into() }
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other { message: message.into() }
    }
}
