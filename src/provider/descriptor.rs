//! Provider descriptor: the issuer/client pair every flow and cache entry is tied to.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant identifiers used in requests and error contexts.
pub mod grant;

pub use builder::*;
pub use grant::*;

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError, TokenSecret},
};

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	#[default]
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
}

/// Immutable provider descriptor consumed by flows and the token cache.
///
/// The issuer is kept verbatim because the ID token `iss` claim must equal it byte for byte;
/// parsing it into a [`Url`] would add a trailing slash to bare origins.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Issuer URL exactly as configured.
	pub issuer: String,
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Client secret for confidential clients.
	pub client_secret: Option<TokenSecret>,
	/// Scopes requested in addition to `openid`.
	pub extra_scopes: ScopeSet,
	/// Client authentication method used when a secret is configured.
	pub client_auth_method: ClientAuthMethod,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided issuer and client identifier.
	pub fn builder(
		issuer: impl Into<String>,
		client_id: impl Into<String>,
	) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(issuer, client_id)
	}

	/// Scopes sent to the provider: `openid` plus the extra scopes.
	pub fn requested_scopes(&self) -> Result<ScopeSet, ScopeValidationError> {
		ScopeSet::openid_with(self.extra_scopes.iter())
	}

	/// Location of the OpenID discovery document for this issuer.
	pub fn discovery_url(&self) -> Result<Url, url::ParseError> {
		Url::parse(&format!(
			"{}/.well-known/openid-configuration",
			self.issuer.trim_end_matches('/')
		))
	}
}
impl Debug for ProviderDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderDescriptor")
			.field("issuer", &self.issuer)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("extra_scopes", &self.extra_scopes)
			.field("client_auth_method", &self.client_auth_method)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn requested_scopes_always_include_openid() {
		let descriptor = ProviderDescriptor::builder("https://accounts.example.com", "kubernetes")
			.extra_scope("groups")
			.build()
			.expect("Descriptor fixture should build.");
		let scopes = descriptor.requested_scopes().expect("Requested scopes should be valid.");

		assert_eq!(scopes.normalized(), "groups openid");
	}

	#[test]
	fn discovery_url_tolerates_trailing_slash() {
		let plain = ProviderDescriptor::builder("https://idp.example.com/realms/dev", "cli")
			.build()
			.expect("Descriptor without trailing slash should build.");
		let slashed = ProviderDescriptor::builder("https://idp.example.com/realms/dev/", "cli")
			.build()
			.expect("Descriptor with trailing slash should build.");
		let expected = "https://idp.example.com/realms/dev/.well-known/openid-configuration";
		let plain_url = plain.discovery_url().expect("Discovery URL should parse.");
		let slashed_url = slashed.discovery_url().expect("Discovery URL should parse.");

		assert_eq!(plain_url.as_str(), expected);
		assert_eq!(slashed_url.as_str(), expected);
		assert_eq!(slashed.issuer, "https://idp.example.com/realms/dev/");
	}

	#[test]
	fn debug_output_hides_the_secret() {
		let descriptor = ProviderDescriptor::builder("https://idp.example.com", "cli")
			.client_secret("hunter2")
			.build()
			.expect("Descriptor with secret should build.");
		let rendered = format!("{descriptor:?}");

		assert!(!rendered.contains("hunter2"));
		assert!(rendered.contains("client_secret_set: true"));
	}
}
