#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! Driver-facing adapters for the `cloudsql` connector.
//!
//! Each database driver exposes connection options in its own shape: MySQL
//! drivers in the URL query string, PostgreSQL drivers as libpq-style
//! `key=value` pairs, SQL Server drivers as a properties map. The adapters in
//! [`mysql`], [`postgres`], and [`sqlserver`] each reduce their driver's
//! surface to the shared [`ConnectOptions`] and route into the core through
//! [`connect`].
//!
//! Three option keys are recognized everywhere: `cloudSqlInstance`
//! (required), `ipTypes` (optional, comma-separated, default
//! `PUBLIC,PRIVATE`), and `unixSocketPath` (optional). When a Unix socket
//! path is set the adapter opens that socket directly and the connector core
//! is bypassed entirely.

pub mod mysql;
pub mod options;
pub mod postgres;
pub mod sqlserver;

mod stream;

use std::path::PathBuf;

use cloudsql::Connector;
use thiserror::Error;

pub use options::{ConnectOptions, OptionsError};
pub use stream::DriverStream;

/// Errors produced by the driver adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShimError {
    /// The driver-supplied options could not be interpreted.
    #[error(transparent)]
    Options(#[from] OptionsError),

    /// The connector core failed.
    #[error(transparent)]
    Connector(#[from] cloudsql::Error),

    /// The Unix-socket bypass failed to open the socket.
    #[error("failed opening unix socket {path:?}: {source}")]
    UnixSocket {
        /// The configured socket path.
        path: PathBuf,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// `unixSocketPath` was set on a platform without Unix domain sockets.
    #[error("unix domain sockets are not supported on this platform")]
    UnixUnsupported,
}

/// Connects according to the resolved options.
///
/// With `unixSocketPath` set this opens the socket directly; otherwise it
/// dials an authenticated TLS connection through the connector core.
///
/// # Errors
///
/// Fails when the Unix socket cannot be opened, or with the core's error for
/// the TLS path.
pub async fn connect(
    connector: &Connector,
    options: &ConnectOptions,
) -> Result<DriverStream, ShimError> {
    if let Some(path) = options.unix_socket_path() {
        return connect_unix(path).await;
    }
    let stream = connector
        .dial_with(options.instance(), options.ip_types())
        .await?;
    Ok(DriverStream::Tls(Box::new(stream)))
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<DriverStream, ShimError> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|source| ShimError::UnixSocket {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(DriverStream::Unix(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> Result<DriverStream, ShimError> {
    Err(ShimError::UnixUnsupported)
}
