//! TLS configuration of the relay.

use std::sync::Arc;

use rcgen::generate_simple_self_signed;
use rustls::ServerConfig;

use super::error::RelayError;

/// Name the self-signed certificate is issued for.
pub const RELAY_SERVER_NAME: &str = "peerdrop.local";

/// Builds the TLS configuration with a freshly generated self-signed certificate.
pub fn build_tls_config() -> Result<Arc<ServerConfig>, RelayError> {
    let cert = generate_simple_self_signed([RELAY_SERVER_NAME.to_string()])
        .map_err(|err| RelayError::Tls(err.to_string()))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|err| RelayError::Tls(err.to_string()))?;
    let key_der = cert.serialize_private_key_der();

    let rustls_cert = rustls::Certificate(cert_der);
    let rustls_key = rustls::PrivateKey(key_der);

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![rustls_cert], rustls_key)
        .map_err(|err| RelayError::Tls(err.to_string()))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_config() {
        assert!(build_tls_config().is_ok());
    }
}
