use std::sync::OnceLock;

/// Select the ring provider for rustls 0.23 once per process.
///
/// rustls panics on the first TLS config build when several providers are compiled in and none
/// was installed. An already-installed provider is left in place.
pub fn install_rustls_crypto_provider() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
