//! TLS client configuration assembly.
//!
//! Built once per refresh cycle, as a pure function of that cycle's material:
//! the configuration presents the ephemeral client certificate with the
//! shared private key and trusts exactly the instance's server CA, nothing
//! else (no system roots). TLS 1.2 is the floor.

mod crypto;
mod verifier;

use std::sync::Arc;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::refresher::{EphemeralCert, InstanceMetadata, RefreshError};
use verifier::InstanceServerVerifier;

/// Assembles the TLS client configuration for one refresh cycle.
///
/// Any cryptographic failure is reported as a [`RefreshError::TlsBuild`]
/// tagged with the instance name and fails the cycle.
pub(crate) fn client_config(
    name: &InstanceName,
    metadata: &InstanceMetadata,
    certificate: &EphemeralCert,
    keys: &ClientKeyPair,
) -> Result<Arc<ClientConfig>, RefreshError> {
    crypto::ensure_crypto_provider_installed();

    let mut roots = RootCertStore::empty();
    roots
        .add(metadata.server_ca().clone())
        .map_err(|e| tls_build(name, format!("server CA rejected by the root store: {e}")))?;

    let verifier =
        InstanceServerVerifier::new(Arc::new(roots)).map_err(|detail| tls_build(name, detail))?;

    let chain = vec![certificate.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(keys.private_key_der().to_vec()));

    let config = ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .dangerous()
    .with_custom_certificate_verifier(Arc::new(verifier))
    .with_client_auth_cert(chain, key)
    .map_err(|e| tls_build(name, format!("failed loading the client identity: {e}")))?;

    Ok(Arc::new(config))
}

fn tls_build(name: &InstanceName, detail: impl Into<String>) -> RefreshError {
    RefreshError::TlsBuild {
        name: name.clone(),
        detail: detail.into(),
    }
}
