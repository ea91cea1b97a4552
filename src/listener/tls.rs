//! HTTPS for the redirect listener.

// crates.io
use rustls::{
	ServerConfig,
	pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
};
use tokio_rustls::TlsAcceptor;
// self
use crate::{_prelude::*, listener::ListenerError};

/// Certificate and key served by the redirect listener, both PEM encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTlsConfig {
	/// Certificate chain, leaf first.
	pub cert_file: PathBuf,
	/// Private key matching the leaf certificate.
	pub key_file: PathBuf,
}

pub(crate) fn acceptor(config: &LocalTlsConfig) -> Result<TlsAcceptor, ListenerError> {
	let tls_error = |path: &Path, source: crate::error::BoxError| ListenerError::Tls {
		path: path.to_path_buf(),
		source,
	};
	let certs = CertificateDer::pem_file_iter(&config.cert_file)
		.and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
		.map_err(|e| tls_error(&config.cert_file, Box::new(e)))?;

	if certs.is_empty() {
		return Err(tls_error(&config.cert_file, "no certificate found in PEM file".into()));
	}

	let key = PrivateKeyDer::from_pem_file(&config.key_file)
		.map_err(|e| tls_error(&config.key_file, Box::new(e)))?;
	let server_config =
		ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
			.with_safe_default_protocol_versions()
			.map_err(|e| tls_error(&config.cert_file, Box::new(e)))?
			.with_no_client_auth()
			.with_single_cert(certs, key)
			.map_err(|e| tls_error(&config.cert_file, Box::new(e)))?;

	Ok(TlsAcceptor::from(Arc::new(server_config)))
}
