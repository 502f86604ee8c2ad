//! Process-wide client key material.
//!
//! A single RSA key pair is shared by every instance engine in the process:
//! generation is expensive, and every ephemeral certificate binds the same
//! public key, so one pair per process is enough. The private key never
//! leaves memory and is never written to disk.

use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

/// Minimum accepted RSA modulus size in bits.
pub const MIN_KEY_BITS: usize = 2048;

const PEM_HEADER: &str = "-----BEGIN RSA PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END RSA PUBLIC KEY-----";
const PEM_LINE_WIDTH: usize = 64;

static SHARED: OnceLock<Arc<ClientKeyPair>> = OnceLock::new();

/// An error that can arise generating or encoding the client key pair.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyError {
    /// RSA key generation failed.
    #[error("failed generating RSA key pair: {0}")]
    Generate(String),

    /// The private key could not be encoded as PKCS#8 DER.
    #[error("failed encoding private key: {0}")]
    EncodePrivate(String),

    /// The public key could not be encoded as PKCS#1 DER.
    #[error("failed encoding public key: {0}")]
    EncodePublic(String),

    /// The supplied key does not meet the minimum modulus size.
    #[error("RSA key is {bits} bits; at least {MIN_KEY_BITS} required")]
    KeyTooSmall {
        /// Modulus size of the rejected key, in bits.
        bits: usize,
    },
}

/// RSA key pair presented by every instance connection in the process.
///
/// Holds the private key as PKCS#8 DER (the form the TLS stack loads) and the
/// public key as PKCS#1 DER (the form the control plane accepts, PEM-wrapped).
pub struct ClientKeyPair {
    private_pkcs8_der: Vec<u8>,
    public_pkcs1_der: Vec<u8>,
}

impl Debug for ClientKeyPair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("ClientKeyPair").finish_non_exhaustive()
    }
}

impl ClientKeyPair {
    /// Generates a fresh RSA-2048 key pair.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if generation or DER encoding fails.
    pub fn generate() -> Result<Self, KeyError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, MIN_KEY_BITS)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        Self::from_private_key(&private)
    }

    /// Builds a key pair from an externally managed RSA private key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyTooSmall`] if the modulus is under 2048 bits,
    /// or an encoding error if the key cannot be serialized.
    pub fn from_private_key(private: &RsaPrivateKey) -> Result<Self, KeyError> {
        let bits = private.size() * 8;
        if bits < MIN_KEY_BITS {
            return Err(KeyError::KeyTooSmall { bits });
        }

        let public = RsaPublicKey::from(private);
        let private_pkcs8_der = private
            .to_pkcs8_der()
            .map_err(|e| KeyError::EncodePrivate(e.to_string()))?
            .as_bytes()
            .to_vec();
        let public_pkcs1_der = public
            .to_pkcs1_der()
            .map_err(|e| KeyError::EncodePublic(e.to_string()))?
            .into_vec();

        Ok(Self {
            private_pkcs8_der,
            public_pkcs1_der,
        })
    }

    /// Returns the process-wide shared key pair, generating it on first use.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the first-use generation fails. A concurrent
    /// first call may generate a second pair; the first one stored wins and
    /// the duplicate is discarded, which is harmless.
    pub fn shared() -> Result<Arc<Self>, KeyError> {
        if let Some(keys) = SHARED.get() {
            return Ok(Arc::clone(keys));
        }
        let generated = Arc::new(Self::generate()?);
        Ok(Arc::clone(SHARED.get_or_init(|| generated)))
    }

    /// The public key as a PEM document in the form the control plane
    /// expects: `RSA PUBLIC KEY` guards around base64 PKCS#1 DER,
    /// hard-wrapped at 64 columns, with a trailing newline.
    pub fn public_key_pem(&self) -> String {
        let body = BASE64.encode(&self.public_pkcs1_der);
        let mut pem = String::with_capacity(
            PEM_HEADER.len() + PEM_FOOTER.len() + body.len() + body.len() / PEM_LINE_WIDTH + 4,
        );
        pem.push_str(PEM_HEADER);
        pem.push('\n');
        let mut rest = body.as_str();
        while !rest.is_empty() {
            let split = rest.len().min(PEM_LINE_WIDTH);
            let (line, tail) = rest.split_at(split);
            pem.push_str(line);
            pem.push('\n');
            rest = tail;
        }
        pem.push_str(PEM_FOOTER);
        pem.push('\n');
        pem
    }

    /// The private key as PKCS#8 DER, for loading into the TLS stack.
    pub(crate) fn private_key_der(&self) -> &[u8] {
        &self.private_pkcs8_der
    }
}
