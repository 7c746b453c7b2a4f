// Client identity loading and TLS configuration.
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use rustls_platform_verifier::BuilderVerifierExt;

use crate::{Result, TransportError};

/// Where the provider's X.509 identity comes from: paths on disk, or PEM
/// blocks already in memory. Neither form is silently preferred; the caller
/// picks one.
///
/// ```no_run
/// use apns_transport::CertificateSource;
///
/// let source = CertificateSource::Files {
///     certificate: "certs/provider-cert.pem".into(),
///     key: "certs/provider-key.pem".into(),
/// };
/// let (_chain, _key) = source.identity().expect("identity");
/// ```
#[derive(Debug, Clone)]
pub enum CertificateSource {
    Files { certificate: PathBuf, key: PathBuf },
    Inline { certificate_pem: Vec<u8>, key_pem: Vec<u8> },
}

impl CertificateSource {
    /// Load the certificate chain and private key this source points at.
    pub fn identity(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let (cert_pem, key_pem) = match self {
            CertificateSource::Files { certificate, key } => {
                (std::fs::read(certificate)?, std::fs::read(key)?)
            }
            CertificateSource::Inline {
                certificate_pem,
                key_pem,
            } => (certificate_pem.clone(), key_pem.clone()),
        };

        let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<std::io::Result<Vec<_>>>()?;
        if chain.is_empty() {
            return Err(TransportError::MissingCertificate);
        }
        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
            .ok_or(TransportError::MissingKey)?;
        Ok((chain, key))
    }
}

/// Build the client TLS configuration: the provider identity is always
/// presented; server verification uses the platform trust store unless a CA
/// bundle is supplied (sandbox gateways, tests).
pub fn client_tls_config(
    source: &CertificateSource,
    ca_bundle: Option<&[u8]>,
) -> Result<Arc<rustls::ClientConfig>> {
    let (chain, key) = source.identity()?;
    let builder = rustls::ClientConfig::builder();
    let config = match ca_bundle {
        Some(pem) => {
            let mut roots = RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut &*pem) {
                roots.add(cert?)?;
            }
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(chain, key)?
        }
        None => builder
            .with_platform_verifier()
            .with_client_auth_cert(chain, key)?,
    };
    Ok(Arc::new(config))
}
