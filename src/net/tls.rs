//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::ConfigError;

/// Load TLS configuration from certificate and key files.
///
/// Both files must exist; a missing one is a configuration error.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, ConfigError> {
    for path in [cert_path, key_path] {
        if !path.is_file() {
            tracing::error!(path = %path.display(), "TLS file not found");
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    tracing::debug!(cert = %cert_path.display(), "TLS configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&key, "not a key").unwrap();

        match load_tls_config(&cert, &key).await {
            Err(ConfigError::MissingFile(path)) => assert_eq!(path, cert),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
