// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError, TokenSecret},
	provider::{ClientAuthMethod, ProviderDescriptor},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ProviderDescriptorError {
	/// The issuer URL is mandatory.
	#[error("Issuer URL is missing.")]
	MissingIssuer,
	/// The client identifier is mandatory.
	#[error("Client ID is missing.")]
	MissingClientId,
	/// The issuer is not an absolute URL.
	#[error("Issuer URL `{issuer}` is invalid: {reason}.")]
	InvalidIssuer {
		/// Issuer string that failed validation.
		issuer: String,
		/// Parser message.
		reason: String,
	},
	/// Issuers must use HTTPS unless they live on a loopback host.
	#[error("The issuer must use HTTPS: {issuer}.")]
	InsecureIssuer {
		/// Issuer string that failed validation.
		issuer: String,
	},
	/// One of the extra scopes is malformed.
	#[error(transparent)]
	InvalidScope(#[from] ScopeValidationError),
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	issuer: String,
	client_id: String,
	client_secret: Option<TokenSecret>,
	extra_scopes: Vec<String>,
	client_auth_method: ClientAuthMethod,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the issuer and client identifier.
	pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
		Self {
			issuer: issuer.into(),
			client_id: client_id.into(),
			client_secret: None,
			extra_scopes: Vec::new(),
			client_auth_method: ClientAuthMethod::default(),
		}
	}

	/// Sets the client secret. An empty string leaves the client public.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		let secret = secret.into();

		self.client_secret = if secret.is_empty() { None } else { Some(TokenSecret::new(secret)) };

		self
	}

	/// Adds one scope on top of `openid`.
	pub fn extra_scope(mut self, scope: impl Into<String>) -> Self {
		self.extra_scopes.push(scope.into());

		self
	}

	/// Adds several scopes on top of `openid`.
	pub fn extra_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.extra_scopes.extend(scopes.into_iter().map(Into::into));

		self
	}

	/// Overrides the client authentication method.
	pub fn client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth_method = method;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		if self.issuer.is_empty() {
			return Err(ProviderDescriptorError::MissingIssuer);
		}
		if self.client_id.is_empty() {
			return Err(ProviderDescriptorError::MissingClientId);
		}

		validate_issuer(&self.issuer)?;

		Ok(ProviderDescriptor {
			issuer: self.issuer,
			client_id: self.client_id,
			client_secret: self.client_secret,
			extra_scopes: ScopeSet::new(self.extra_scopes)?,
			client_auth_method: self.client_auth_method,
		})
	}
}

fn validate_issuer(issuer: &str) -> Result<(), ProviderDescriptorError> {
	let url = Url::parse(issuer).map_err(|e| ProviderDescriptorError::InvalidIssuer {
		issuer: issuer.to_owned(),
		reason: e.to_string(),
	})?;

	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(&url) => Ok(()),
		_ => Err(ProviderDescriptorError::InsecureIssuer { issuer: issuer.to_owned() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host_str() {
		Some("localhost") => true,
		Some(host) => host
			.trim_start_matches('[')
			.trim_end_matches(']')
			.parse::<IpAddr>()
			.is_ok_and(|ip| ip.is_loopback()),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn issuer_and_client_id_are_mandatory() {
		assert_eq!(
			ProviderDescriptor::builder("", "cli").build(),
			Err(ProviderDescriptorError::MissingIssuer)
		);
		assert_eq!(
			ProviderDescriptor::builder("https://idp.example.com", "").build(),
			Err(ProviderDescriptorError::MissingClientId)
		);
	}

	#[test]
	fn plain_http_is_only_accepted_on_loopback() {
		assert!(
			ProviderDescriptor::builder("http://127.0.0.1:8080/realms/x", "cli").build().is_ok()
		);
		assert!(ProviderDescriptor::builder("http://localhost:5556/dex", "cli").build().is_ok());
		assert!(ProviderDescriptor::builder("http://[::1]:9000", "cli").build().is_ok());
		assert!(matches!(
			ProviderDescriptor::builder("http://idp.example.com", "cli").build(),
			Err(ProviderDescriptorError::InsecureIssuer { .. })
		));
		assert!(matches!(
			ProviderDescriptor::builder("not a url", "cli").build(),
			Err(ProviderDescriptorError::InvalidIssuer { .. })
		));
	}

	#[test]
	fn empty_secret_means_public_client() {
		let descriptor = ProviderDescriptor::builder("https://idp.example.com", "cli")
			.client_secret("")
			.build()
			.expect("Descriptor with empty secret should build.");

		assert!(descriptor.client_secret.is_none());
	}

	#[test]
	fn malformed_extra_scope_is_rejected() {
		let err = ProviderDescriptor::builder("https://idp.example.com", "cli")
			.extra_scopes(["groups", "has space"])
			.build()
			.expect_err("Scopes with whitespace must be rejected.");

		assert!(matches!(err, ProviderDescriptorError::InvalidScope(_)));
	}
}
