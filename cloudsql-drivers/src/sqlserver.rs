//! SQL Server adapter.
//!
//! SQL Server drivers (JDBC- and R2DBC-style alike) surface options as a
//! properties map; the adapter reads the connector keys out of it.

use std::collections::HashMap;

use cloudsql::Connector;

use crate::options::ConnectOptions;
use crate::{DriverStream, OptionsError, ShimError};

/// Extracts connector options from a driver properties map.
///
/// # Errors
///
/// Fails when `cloudSqlInstance` is missing or `ipTypes` is empty.
pub fn options_from_properties(
    properties: &HashMap<String, String>,
) -> Result<ConnectOptions, OptionsError> {
    ConnectOptions::from_pairs(
        properties
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    )
}

/// Opens a connection for a SQL Server driver from its properties map.
///
/// # Errors
///
/// Fails on unusable options or when the underlying connect fails; see
/// [`crate::connect`].
pub async fn connect(
    connector: &Connector,
    properties: &HashMap<String, String>,
) -> Result<DriverStream, ShimError> {
    let options = options_from_properties(properties)?;
    crate::connect(connector, &options).await
}
