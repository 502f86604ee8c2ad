//! Shared test fixtures: a minted PKI and a scriptable control-plane stub.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloudsql::admin::{
    AdminApi, ApiError, CreateEphemeralRequest, DatabaseInstance, IpMapping, SslCert,
};
use cloudsql::ClientKeyPair;
use once_cell::sync::Lazy;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::pki_types::CertificateDer;

/// Everything the tests need from one certificate authority world: the
/// instance CA, a server certificate signed by it (subject `proj:db`, no
/// SANs, like a real instance certificate), an ephemeral client certificate
/// binding the shared RSA public key, and an unrelated CA for negative tests.
pub struct TestPki {
    pub ca_pem: String,
    pub ca_der: CertificateDer<'static>,
    pub server_cert_der: CertificateDer<'static>,
    pub server_key_pkcs8: Vec<u8>,
    pub client_keys: Arc<ClientKeyPair>,
    pub ephemeral_pem: String,
    pub other_ca_pem: String,
}

pub static PKI: Lazy<TestPki> = Lazy::new(TestPki::generate);

impl TestPki {
    fn generate() -> Self {
        ensure_provider();

        let rsa_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
            .expect("RSA key generation must succeed");
        let client_keys =
            Arc::new(ClientKeyPair::from_private_key(&rsa_key).expect("key pair from private key"));

        let ca_key = KeyPair::generate().expect("CA key");
        let mut ca_params = CertificateParams::new(Vec::new()).expect("CA params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Test Instance CA");
        let ca_cert = ca_params.self_signed(&ca_key).expect("CA cert");

        let server_key = KeyPair::generate().expect("server key");
        let mut server_params = CertificateParams::new(Vec::new()).expect("server params");
        server_params
            .distinguished_name
            .push(DnType::CommonName, "proj:db");
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("server cert");

        let rsa_pkcs8 = rsa_key
            .to_pkcs8_der()
            .expect("client key pkcs8")
            .as_bytes()
            .to_vec();
        let client_rcgen_key = KeyPair::try_from(rsa_pkcs8.as_slice()).expect("client rcgen key");
        let mut ephemeral_params = CertificateParams::new(Vec::new()).expect("ephemeral params");
        ephemeral_params
            .distinguished_name
            .push(DnType::CommonName, "proj:db");
        let ephemeral_cert = ephemeral_params
            .signed_by(&client_rcgen_key, &ca_cert, &ca_key)
            .expect("ephemeral cert");

        let other_ca_key = KeyPair::generate().expect("other CA key");
        let mut other_ca_params = CertificateParams::new(Vec::new()).expect("other CA params");
        other_ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        other_ca_params
            .distinguished_name
            .push(DnType::CommonName, "Unrelated CA");
        let other_ca = other_ca_params
            .self_signed(&other_ca_key)
            .expect("other CA cert");

        Self {
            ca_pem: ca_cert.pem(),
            ca_der: ca_cert.der().clone(),
            server_cert_der: server_cert.der().clone(),
            server_key_pkcs8: server_key.serialize_der(),
            client_keys,
            ephemeral_pem: ephemeral_cert.pem(),
            other_ca_pem: other_ca.pem(),
        }
    }
}

pub fn ensure_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Builds a metadata response in the control plane's wire shape.
pub fn instance_info(region: &str, ips: &[(&str, &str)], ca_pem: &str) -> DatabaseInstance {
    DatabaseInstance {
        region: region.to_string(),
        backend_type: "SECOND_GEN".to_string(),
        ip_addresses: ips
            .iter()
            .map(|(tag, address)| IpMapping {
                ip_type: (*tag).to_string(),
                ip_address: (*address).to_string(),
            })
            .collect(),
        server_ca_cert: Some(SslCert {
            cert: ca_pem.to_string(),
        }),
    }
}

/// Scriptable control-plane stub.
///
/// `get_instance` pops queued one-shot responses first, then serves the
/// default; `create_ephemeral_cert` always returns the fixture certificate.
/// Both count their calls.
pub struct StubAdmin {
    default_instance: Mutex<DatabaseInstance>,
    queued: Mutex<VecDeque<Result<DatabaseInstance, ApiError>>>,
    gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    ephemeral_pem: String,
    metadata_calls: AtomicUsize,
    cert_calls: AtomicUsize,
}

impl StubAdmin {
    pub fn new(default_instance: DatabaseInstance, ephemeral_pem: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            default_instance: Mutex::new(default_instance),
            queued: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            ephemeral_pem: ephemeral_pem.into(),
            metadata_calls: AtomicUsize::new(0),
            cert_calls: AtomicUsize::new(0),
        })
    }

    /// Makes the next `get_instance` call park until the returned sender
    /// fires, so tests can hold a refresh in its running state.
    pub fn gate_next_metadata(&self) -> tokio::sync::oneshot::Sender<()> {
        let (release, parked) = tokio::sync::oneshot::channel();
        *self.gate.lock().unwrap() = Some(parked);
        release
    }

    pub fn set_instance(&self, instance: DatabaseInstance) {
        *self.default_instance.lock().unwrap() = instance;
    }

    pub fn queue_instance_response(&self, response: Result<DatabaseInstance, ApiError>) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn cert_calls(&self) -> usize {
        self.cert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminApi for StubAdmin {
    async fn get_instance(
        &self,
        _project: &str,
        _instance: &str,
    ) -> Result<DatabaseInstance, ApiError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let parked = self.gate.lock().unwrap().take();
        if let Some(parked) = parked {
            let _ = parked.await;
        }
        if let Some(queued) = self.queued.lock().unwrap().pop_front() {
            return queued;
        }
        Ok(self.default_instance.lock().unwrap().clone())
    }

    async fn create_ephemeral_cert(
        &self,
        _project: &str,
        _instance: &str,
        _request: CreateEphemeralRequest,
    ) -> Result<SslCert, ApiError> {
        self.cert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SslCert {
            cert: self.ephemeral_pem.clone(),
        })
    }
}
