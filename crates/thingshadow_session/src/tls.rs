//! Loading of device certificates for mutual TLS.

use crate::error::{ShadowError, ShadowResult};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Paths to the device's TLS material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// PEM client certificate (chain).
    pub cert_path: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub key_path: PathBuf,
    /// PEM CA bundle. Without it the bundled web PKI roots are trusted.
    pub ca_path: Option<PathBuf>,
}

impl TlsMaterial {
    /// Creates material from a certificate and key, trusting the default roots.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
        }
    }

    /// Trusts only the given CA bundle.
    pub fn with_ca(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    /// Builds a rustls client configuration presenting the client certificate.
    pub fn client_config(&self) -> ShadowResult<Arc<ClientConfig>> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_private_key(&self.key_path)?;

        let mut roots = RootCertStore::empty();
        match &self.ca_path {
            Some(path) => {
                for cert in load_certs(path)? {
                    roots.add(cert).map_err(|e| certificate_error(path, e))?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| ShadowError::Tls(e.to_string()))?;

        Ok(Arc::new(config))
    }
}

fn certificate_error(path: &Path, reason: impl ToString) -> ShadowError {
    ShadowError::Certificate {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn open(path: &Path) -> ShadowResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| certificate_error(path, e))
}

/// Reads every certificate in a PEM file.
pub fn load_certs(path: &Path) -> ShadowResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| certificate_error(path, e))?;

    if certs.is_empty() {
        return Err(certificate_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// Reads the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> ShadowResult<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| certificate_error(path, e))?
        .ok_or_else(|| certificate_error(path, "no private key found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cert: PathBuf,
        key: PathBuf,
        ca: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let ca = rcgen::generate_simple_self_signed(vec!["ca.local".into()]).unwrap();
        let device = rcgen::generate_simple_self_signed(vec!["device.local".into()]).unwrap();

        let cert = dir.path().join("device.pem.crt");
        let key = dir.path().join("private.pem.key");
        let ca_path = dir.path().join("root-CA.crt");
        std::fs::write(&cert, device.cert.pem()).unwrap();
        std::fs::write(&key, device.key_pair.serialize_pem()).unwrap();
        std::fs::write(&ca_path, ca.cert.pem()).unwrap();

        Fixture {
            _dir: dir,
            cert,
            key,
            ca: ca_path,
        }
    }

    #[test]
    fn loads_with_custom_ca() {
        let f = fixture();
        let material = TlsMaterial::new(&f.cert, &f.key).with_ca(&f.ca);
        assert!(material.client_config().is_ok());
        assert_eq!(load_certs(&f.ca).unwrap().len(), 1);
    }

    #[test]
    fn loads_with_default_roots() {
        let f = fixture();
        let material = TlsMaterial::new(&f.cert, &f.key);
        assert!(material.client_config().is_ok());
    }

    #[test]
    fn missing_file_names_the_path() {
        let f = fixture();
        let missing = f.cert.with_file_name("missing.pem");
        let material = TlsMaterial::new(&missing, &f.key);

        match material.client_config() {
            Err(ShadowError::Certificate { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let f = fixture();
        // A certificate where the key should be.
        let material = TlsMaterial::new(&f.cert, &f.cert);

        match material.client_config() {
            Err(ShadowError::Certificate { path, reason }) => {
                assert_eq!(path, f.cert);
                assert!(reason.contains("no private key"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let f = fixture();
        let empty = f.cert.with_file_name("empty.pem");
        std::fs::write(&empty, "").unwrap();

        let err = load_certs(&empty).unwrap_err();
        assert!(err.to_string().contains("no certificates found"));
    }
}
