//! Crate-level error type.

use std::net::SocketAddr;

use thiserror::Error;

use crate::instance::InstanceNameError;
use crate::keys::KeyError;
use crate::refresher::RefreshError;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the connector.
///
/// Configuration problems (bad name, region mismatch, no matching address)
/// persist until the operator corrects the input. Dial failures are not
/// retried by the connector; the caller may
/// [`force_refresh`](crate::Connector::force_refresh) and try again.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The instance connection name could not be parsed.
    #[error("invalid instance connection name {name:?}: {source}")]
    InvalidInstanceName {
        /// The rejected input.
        name: String,
        /// Why parsing failed.
        #[source]
        source: InstanceNameError,
    },

    /// Generating or encoding the shared client key pair failed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The credential refresh cycle backing this call failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// The instance has no address matching the requested preferences.
    #[error(
        "[{name}] instance has no IP address matching the requested preferences ({})",
        .preferences.join(", ")
    )]
    NoMatchingIp {
        /// Instance connection name.
        name: String,
        /// The preference list that failed to match.
        preferences: Vec<String>,
    },

    /// Opening the TCP connection to the instance failed.
    #[error("[{name}] failed connecting to {address}: {source}")]
    Connect {
        /// Instance connection name.
        name: String,
        /// The address the connector tried to reach.
        address: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The TLS handshake with the instance failed.
    #[error("[{name}] TLS handshake with the instance failed: {source}")]
    Handshake {
        /// Instance connection name.
        name: String,
        /// Underlying handshake error.
        #[source]
        source: std::io::Error,
    },

    /// The connector or the instance's refresh engine has been closed.
    #[error("connector is closed")]
    Closed,

    /// Invariant violation inside the connector.
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}
