//! Refresh-cycle failures.

use std::fmt;
use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::instance::InstanceName;

/// Which certificate a parse failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CertSubject {
    /// The instance's server CA certificate from the metadata response.
    ServerCa,
    /// The ephemeral client certificate minted by the control plane.
    Ephemeral,
}

impl Display for CertSubject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CertSubject::ServerCa => f.write_str("server CA"),
            CertSubject::Ephemeral => f.write_str("ephemeral client"),
        }
    }
}

/// Failure of one credential refresh cycle.
///
/// Cloneable because a single failure is delivered to every reader blocked on
/// that cycle. Configuration failures (region, backend) persist until the
/// operator corrects the input; the engine still retries them on schedule.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RefreshError {
    /// The region in the connection name does not match the instance.
    #[error(
        "[{name}] the region in the connection name does not match the instance region \
         {actual:?}; verify the instance connection name"
    )]
    RegionMismatch {
        /// Instance the refresh ran for.
        name: InstanceName,
        /// Region reported by the control plane.
        actual: String,
    },

    /// The instance's backing generation does not support authenticated
    /// connector access.
    #[error("[{name}] connections are not supported for backend type {backend:?}")]
    UnsupportedBackend {
        /// Instance the refresh ran for.
        name: InstanceName,
        /// Backend type reported by the control plane.
        backend: String,
    },

    /// The instance has no assigned IP addresses.
    #[error("[{name}] the instance does not have an assigned IP address")]
    NoIpAddresses {
        /// Instance the refresh ran for.
        name: InstanceName,
    },

    /// The control plane returned an address that is not an IP literal.
    #[error("[{name}] the control plane returned an unusable IP address {address:?}")]
    BadIpAddress {
        /// Instance the refresh ran for.
        name: InstanceName,
        /// The rejected address string.
        address: String,
    },

    /// The metadata response carried no server CA certificate.
    #[error("[{name}] the instance metadata is missing the server CA certificate")]
    MissingServerCa {
        /// Instance the refresh ran for.
        name: InstanceName,
    },

    /// A control-plane call failed; the message is already classified and
    /// instance-tagged.
    #[error("{message}")]
    Api {
        /// Actionable description of the failure.
        message: String,
    },

    /// A certificate in a control-plane response could not be parsed.
    #[error("[{name}] failed parsing the {subject} certificate: {detail}")]
    CertParse {
        /// Instance the refresh ran for.
        name: InstanceName,
        /// Which certificate failed to parse.
        subject: CertSubject,
        /// Parser diagnostic.
        detail: String,
    },

    /// The TLS client configuration could not be assembled.
    #[error("[{name}] failed building the TLS client configuration: {detail}")]
    TlsBuild {
        /// Instance the refresh ran for.
        name: InstanceName,
        /// Underlying diagnostic.
        detail: String,
    },
}
