//! TLS client configuration.

use std::sync::Arc;

/// Build the rustls client configuration shared by all connections of a
/// client: webpki roots, ring provider, HTTP/1.1 only.
pub fn client_config() -> Result<Arc<rustls::ClientConfig>, rustls::Error> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builds() {
        let config = client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }
}
