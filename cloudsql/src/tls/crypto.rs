use std::sync::OnceLock;

/// Installs the ring crypto provider as the process default.
///
/// Idempotent and best-effort: if the embedding application already installed
/// a provider, that one wins.
pub(crate) fn ensure_crypto_provider_installed() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
