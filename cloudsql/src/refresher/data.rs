//! Snapshots produced by a refresh cycle.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;

use crate::admin::DatabaseInstance;
use crate::instance::InstanceName;
use crate::refresher::error::{CertSubject, RefreshError};

/// User-facing tag for an instance's public address.
pub const IP_TYPE_PUBLIC: &str = "PUBLIC";
/// User-facing tag for an instance's private (VPC) address.
pub const IP_TYPE_PRIVATE: &str = "PRIVATE";

// The control plane tags public addresses PRIMARY.
const IP_TYPE_PRIMARY: &str = "PRIMARY";

const SUPPORTED_BACKEND: &str = "SECOND_GEN";

/// Validated instance metadata from one refresh cycle.
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    ip_addresses: HashMap<String, IpAddr>,
    server_ca: CertificateDer<'static>,
}

impl InstanceMetadata {
    /// Validates a raw metadata response against the requested instance name.
    pub(crate) fn from_api(
        name: &InstanceName,
        info: DatabaseInstance,
    ) -> Result<Self, RefreshError> {
        if info.region != name.region() {
            return Err(RefreshError::RegionMismatch {
                name: name.clone(),
                actual: info.region,
            });
        }
        if info.backend_type != SUPPORTED_BACKEND {
            return Err(RefreshError::UnsupportedBackend {
                name: name.clone(),
                backend: info.backend_type,
            });
        }

        let mut ip_addresses = HashMap::with_capacity(info.ip_addresses.len() + 1);
        for mapping in &info.ip_addresses {
            let address: IpAddr =
                mapping
                    .ip_address
                    .parse()
                    .map_err(|_| RefreshError::BadIpAddress {
                        name: name.clone(),
                        address: mapping.ip_address.clone(),
                    })?;
            ip_addresses.insert(mapping.ip_type.clone(), address);
        }
        // Index the PRIMARY-tagged public address under PUBLIC as well, so
        // the documented preference tags stay usable.
        if !ip_addresses.contains_key(IP_TYPE_PUBLIC) {
            if let Some(address) = ip_addresses.get(IP_TYPE_PRIMARY).copied() {
                ip_addresses.insert(IP_TYPE_PUBLIC.to_string(), address);
            }
        }
        if ip_addresses.is_empty() {
            return Err(RefreshError::NoIpAddresses { name: name.clone() });
        }

        let pem = info
            .server_ca_cert
            .as_ref()
            .map(|cert| cert.cert.as_str())
            .filter(|pem| !pem.is_empty())
            .ok_or_else(|| RefreshError::MissingServerCa { name: name.clone() })?;
        let (server_ca, _) = parse_certificate_pem(name, CertSubject::ServerCa, pem)?;

        Ok(Self {
            ip_addresses,
            server_ca,
        })
    }

    /// Returns the first address whose tag appears in `preferences`, honoring
    /// their order. Tags are matched exactly and case-sensitively.
    pub fn preferred_ip<S: AsRef<str>>(&self, preferences: &[S]) -> Option<IpAddr> {
        preferences
            .iter()
            .find_map(|tag| self.ip_addresses.get(tag.as_ref()).copied())
    }

    /// All assigned addresses by tag.
    pub fn ip_addresses(&self) -> &HashMap<String, IpAddr> {
        &self.ip_addresses
    }

    pub(crate) fn server_ca(&self) -> &CertificateDer<'static> {
        &self.server_ca
    }
}

/// The short-lived client certificate minted for one refresh cycle.
#[derive(Debug, Clone)]
pub struct EphemeralCert {
    der: CertificateDer<'static>,
    not_after: SystemTime,
}

impl EphemeralCert {
    pub(crate) fn from_pem(name: &InstanceName, pem: &str) -> Result<Self, RefreshError> {
        let (der, not_after) = parse_certificate_pem(name, CertSubject::Ephemeral, pem)?;
        Ok(Self { der, not_after })
    }

    /// End of the certificate's declared validity.
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    pub(crate) fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

fn parse_certificate_pem(
    name: &InstanceName,
    subject: CertSubject,
    pem: &str,
) -> Result<(CertificateDer<'static>, SystemTime), RefreshError> {
    let cert_parse = |detail: String| RefreshError::CertParse {
        name: name.clone(),
        subject,
        detail,
    };

    let (_, document) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| cert_parse(e.to_string()))?;
    let not_after = {
        let cert = document
            .parse_x509()
            .map_err(|e| cert_parse(e.to_string()))?;
        let seconds = cert.validity().not_after.timestamp();
        if seconds >= 0 {
            UNIX_EPOCH + Duration::from_secs(seconds as u64)
        } else {
            UNIX_EPOCH
        }
    };
    Ok((CertificateDer::from(document.contents), not_after))
}

/// One refresh cycle's outputs, served to dial callers as a unit.
///
/// All three parts were produced in the same cycle; a caller never sees
/// metadata from one cycle paired with a certificate or TLS configuration
/// from another.
#[derive(Clone)]
pub struct InstanceData {
    metadata: InstanceMetadata,
    certificate: EphemeralCert,
    tls_config: Arc<ClientConfig>,
}

impl Debug for InstanceData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceData")
            .field("metadata", &self.metadata)
            .field("certificate", &self.certificate)
            .field("tls_config", &"<ClientConfig>")
            .finish()
    }
}

impl InstanceData {
    pub(crate) fn new(
        metadata: InstanceMetadata,
        certificate: EphemeralCert,
        tls_config: Arc<ClientConfig>,
    ) -> Self {
        Self {
            metadata,
            certificate,
            tls_config,
        }
    }

    /// The validated instance metadata from this cycle.
    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    /// The ephemeral client certificate from this cycle.
    pub fn certificate(&self) -> &EphemeralCert {
        &self.certificate
    }

    /// The TLS client configuration assembled from this cycle's material.
    pub fn tls_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.tls_config)
    }
}
