//! MySQL adapter.
//!
//! MySQL drivers carry connector options in the connection URL's query
//! string, e.g.
//! `mysql://host/db?cloudSqlInstance=p:r:i&ipTypes=PRIVATE&user=app`.

use cloudsql::Connector;

use crate::options::ConnectOptions;
use crate::{DriverStream, OptionsError, ShimError};

/// Extracts connector options from a URL query string.
///
/// Pairs without an `=` are treated as keys with an empty value; foreign
/// driver parameters are ignored.
///
/// # Errors
///
/// Fails when `cloudSqlInstance` is missing or `ipTypes` is empty.
pub fn options_from_query(query: &str) -> Result<ConnectOptions, OptionsError> {
    ConnectOptions::from_pairs(
        query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, ""))),
    )
}

/// Opens a connection for a MySQL driver from its URL query string.
///
/// # Errors
///
/// Fails on unusable options or when the underlying connect fails; see
/// [`crate::connect`].
pub async fn connect(connector: &Connector, query: &str) -> Result<DriverStream, ShimError> {
    let options = options_from_query(query)?;
    crate::connect(connector, &options).await
}
