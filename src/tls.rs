use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::{self, ServerConfig};
use pgwire::tokio::TlsAcceptor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("both BAYPLAN_TLS_CERT and BAYPLAN_TLS_KEY must be set, or neither")]
    HalfConfigured,
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("no private key found in {0}")]
    NoKey(String),
    #[error("invalid certificate or key: {0}")]
    Config(#[from] rustls::Error),
}

pub fn load_tls_acceptor(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Option<TlsAcceptor>, TlsError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => return Err(TlsError::HalfConfigured),
    };
    let read_err = |path: &str| {
        let path = path.to_string();
        move |source| TlsError::Read { path, source }
    };

    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(read_err(cert_path))?);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(read_err(cert_path))?;

    let mut key_reader = BufReader::new(File::open(key_path).map_err(read_err(key_path))?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoKey(key_path.to_string()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_paths() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn half_configuration_rejected() {
        assert!(matches!(
            load_tls_acceptor(Some("cert.pem"), None),
            Err(TlsError::HalfConfigured)
        ));
    }

    #[test]
    fn missing_cert_file_names_path() {
        match load_tls_acceptor(Some("/nonexistent/bayplan.crt"), Some("/nonexistent/bayplan.key")) {
            Err(err) => assert!(err.to_string().contains("/nonexistent/bayplan.crt")),
            Ok(_) => panic!("expected a read error"),
        }
    }
}
