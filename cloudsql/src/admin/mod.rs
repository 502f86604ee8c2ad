//! Control-plane Admin API abstraction.
//!
//! The connector consumes exactly two remote operations: fetching instance
//! metadata and minting an ephemeral client certificate. The concrete client
//! (HTTP transport, credentials, retries) is supplied by the embedding
//! application; this module defines the contract and the wire shapes it must
//! speak.

mod error;

pub(crate) use error::describe_api_error;
pub use error::ApiError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata the control plane reports for one database instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    /// Region the instance runs in.
    pub region: String,
    /// Backing generation, e.g. `SECOND_GEN`.
    pub backend_type: String,
    /// Assigned addresses, tagged by type.
    #[serde(default)]
    pub ip_addresses: Vec<IpMapping>,
    /// The instance's server CA certificate.
    pub server_ca_cert: Option<SslCert>,
}

/// One assigned instance address.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    /// Address type tag (`PRIMARY`, `PRIVATE`, ...). Matched case-sensitively.
    #[serde(rename = "type")]
    pub ip_type: String,
    /// The IPv4 or IPv6 address.
    pub ip_address: String,
}

/// A PEM-encoded X.509 certificate as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslCert {
    /// The certificate, PEM-encoded.
    pub cert: String,
}

/// Request body for minting an ephemeral client certificate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEphemeralRequest {
    /// The client public key as an `RSA PUBLIC KEY` PEM document.
    pub public_key: String,
}

/// The two control-plane calls the connector depends on.
///
/// Implementations must be safe for concurrent calls; every instance engine
/// in the process shares one client.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Fetches the current metadata for an instance.
    async fn get_instance(
        &self,
        project: &str,
        instance: &str,
    ) -> Result<DatabaseInstance, ApiError>;

    /// Creates a short-lived (about one hour) client certificate binding the
    /// supplied public key to the instance.
    async fn create_ephemeral_cert(
        &self,
        project: &str,
        instance: &str,
        request: CreateEphemeralRequest,
    ) -> Result<SslCert, ApiError>;
}
