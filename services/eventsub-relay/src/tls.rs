//! HTTPS listener setup

use axum_server::tls_rustls::RustlsConfig;
use std::path::Path;

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// Build the rustls config from PEM files.
///
/// The served chain is `cert_file` followed by `ca_file` when one is given.
pub async fn load_rustls(server: &ServerConfig) -> Result<RustlsConfig> {
    let (Some(cert_file), Some(key_file)) = (&server.cert_file, &server.key_file) else {
        return Err(Error::Tls("cert_file and key_file are both required".into()));
    };

    let mut chain = read_pem(cert_file).await?;
    if let Some(ca_file) = &server.ca_file {
        if !chain.ends_with(b"\n") {
            chain.push(b'\n');
        }
        chain.extend(read_pem(ca_file).await?);
    }
    let key = read_pem(key_file).await?;

    RustlsConfig::from_pem(chain, key)
        .await
        .map_err(|e| Error::Tls(format!("invalid certificate or key: {e}")))
}

async fn read_pem(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| Error::Tls(format!("reading {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn server(cert: Option<PathBuf>, key: Option<PathBuf>) -> ServerConfig {
        ServerConfig {
            cert_file: cert,
            key_file: key,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_certificate_file_is_tls_error() {
        let config = server(
            Some(PathBuf::from("/nonexistent/cert.pem")),
            Some(PathBuf::from("/nonexistent/key.pem")),
        );
        let err = load_rustls(&config).await.unwrap_err();
        assert!(matches!(err, Error::Tls(ref msg) if msg.contains("cert.pem")), "got: {err}");
    }

    #[tokio::test]
    async fn garbage_pem_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = load_rustls(&server(Some(cert), Some(key))).await.unwrap_err();
        assert!(matches!(err, Error::Tls(_)), "got: {err}");
    }

    #[tokio::test]
    async fn plain_config_is_rejected() {
        let err = load_rustls(&server(None, None)).await.unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }
}
