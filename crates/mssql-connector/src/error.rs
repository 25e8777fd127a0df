//! Unified error taxonomy exposed to the embedding engine.
//!
//! Every error produced below `mssql-connector` is translated into exactly
//! one of these kinds before it reaches the engine's exception mechanism.

use thiserror::Error;

/// The abstract error kinds the engine's exception mechanism understands.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing or invalid secret/connection-string field. Rejected before
    /// any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// TCP failure, TLS failure, or read/write timeout. The connection is
    /// marked broken; retried only at higher layers.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed packet or token sequence. The connection is broken.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// LOGIN failure or FEDAUTH rejection.
    #[error("authentication error: {0}")]
    Auth(String),

    /// ERROR token with severity 11-16. The connection remains usable.
    #[error("server error {number} (severity {severity}): {message}")]
    Server {
        /// SQL Server error number.
        number: i32,
        /// Error severity (11-16 for this kind).
        severity: u8,
        /// Server-provided message text.
        message: String,
        /// Object the error concerns, when known.
        object: Option<String>,
    },

    /// ERROR with severity >= 20. Thrown immediately; connection broken.
    #[error("fatal server error {number} (severity {severity}): {message}")]
    FatalServer {
        /// SQL Server error number.
        number: i32,
        /// Error severity (>= 20 for this kind).
        severity: u8,
        /// Server-provided message text.
        message: String,
    },

    /// User cancellation was honored.
    #[error("operation cancelled")]
    Cancelled,

    /// Pool acquisition timed out.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Feature the connector deliberately does not support (XML/UDT/etc.,
    /// an unpushable predicate, a second result set).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// DDL or exec attempted on a read-only attachment.
    #[error("read-only violation: {0}")]
    ReadOnlyViolation(String),
}

impl ConnectorError {
    /// `true` for kinds that destroy the underlying connection
    /// (`Network`, `Protocol`, `FatalServer`).
    #[must_use]
    pub fn destroys_connection(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Protocol(_) | Self::FatalServer { .. }
        )
    }

    /// `true` for user errors that should never be retried
    /// (`Unsupported`, `ReadOnlyViolation`).
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::ReadOnlyViolation(_))
    }
}

impl From<mssql_client::Error> for ConnectorError {
    fn from(e: mssql_client::Error) -> Self {
        use mssql_client::Error as E;
        match e {
            E::Config(msg) => Self::Config(msg),
            E::Connection(msg) | E::Transaction(msg) | E::Query(msg) => Self::Network(msg),
            E::ConnectionClosed
            | E::ConnectTimeout
            | E::TlsTimeout
            | E::ConnectionTimeout
            | E::CommandTimeout
            | E::Io(_) => Self::Network(e.to_string()),
            E::Authentication(_) => Self::Auth(e.to_string()),
            E::Tls(msg) | E::Protocol(msg) => Self::Protocol(msg),
            E::Codec(_) => Self::Protocol(e.to_string()),
            E::Type(_) => Self::Unsupported(e.to_string()),
            E::Server {
                number,
                class,
                message,
                procedure,
                ..
            } => {
                if class >= 20 {
                    Self::FatalServer {
                        number,
                        severity: class,
                        message,
                    }
                } else {
                    Self::Server {
                        number,
                        severity: class,
                        message,
                        object: procedure,
                    }
                }
            }
            E::Routing { host, port } => {
                Self::Network(format!("routing required to {host}:{port}"))
            }
            E::TooManyRedirects { max } => {
                Self::Network(format!("too many redirects (max {max})"))
            }
            E::InvalidIdentifier(msg) => Self::Config(msg),
            E::PoolExhausted => Self::PoolExhausted,
        }
    }
}

impl From<mssql_driver_pool::PoolError> for ConnectorError {
    fn from(e: mssql_driver_pool::PoolError) -> Self {
        use mssql_driver_pool::PoolError as E;
        match e {
            E::Timeout => Self::PoolExhausted,
            E::PoolClosed => Self::Network("pool is closed".to_string()),
            E::Configuration(msg) => Self::Config(msg),
            E::ConnectionCreation(msg) | E::UnhealthyConnection(msg) | E::ResetFailed(msg) => {
                Self::Network(msg)
            }
            E::MaxConnectionsReached { .. } => Self::PoolExhausted,
            E::ValidationFailed(msg) => Self::Config(msg),
        }
    }
}

impl From<mssql_types::TypeError> for ConnectorError {
    fn from(e: mssql_types::TypeError) -> Self {
        Self::Unsupported(e.to_string())
    }
}

impl From<tds_protocol::ProtocolError> for ConnectorError {
    fn from(e: tds_protocol::ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
