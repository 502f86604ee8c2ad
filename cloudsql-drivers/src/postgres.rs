//! PostgreSQL adapter.
//!
//! PostgreSQL drivers take libpq-style connection strings of
//! whitespace-separated `key=value` pairs, e.g.
//! `dbname=app user=app cloudSqlInstance=p:r:i ipTypes=PRIVATE`.

use cloudsql::Connector;

use crate::options::ConnectOptions;
use crate::{DriverStream, OptionsError, ShimError};

/// Extracts connector options from a libpq-style connection string.
///
/// Tokens without an `=` are ignored, as are foreign driver keys.
///
/// # Errors
///
/// Fails when `cloudSqlInstance` is missing or `ipTypes` is empty.
pub fn options_from_conninfo(conninfo: &str) -> Result<ConnectOptions, OptionsError> {
    ConnectOptions::from_pairs(
        conninfo
            .split_whitespace()
            .filter_map(|token| token.split_once('=')),
    )
}

/// Opens a connection for a PostgreSQL driver from its connection string.
///
/// # Errors
///
/// Fails on unusable options or when the underlying connect fails; see
/// [`crate::connect`].
pub async fn connect(connector: &Connector, conninfo: &str) -> Result<DriverStream, ShimError> {
    let options = options_from_conninfo(conninfo)?;
    crate::connect(connector, &options).await
}
