//! OpenID discovery metadata and the signing keys fetched alongside it.

// crates.io
use jsonwebtoken::jwk::JwkSet;
// self
use crate::_prelude::*;

/// Provider endpoints the client talks to, used to label errors and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderEndpoint {
	/// `/.well-known/openid-configuration`.
	Discovery,
	/// The `jwks_uri` signing key document.
	Jwks,
	/// The token endpoint (every grant and refresh).
	Token,
	/// The RFC 8628 device authorization endpoint.
	DeviceAuthorization,
}
impl ProviderEndpoint {
	/// Human-readable label used in error messages.
	pub fn as_str(self) -> &'static str {
		match self {
			ProviderEndpoint::Discovery => "discovery",
			ProviderEndpoint::Jwks => "jwks",
			ProviderEndpoint::Token => "token",
			ProviderEndpoint::DeviceAuthorization => "device authorization",
		}
	}
}
impl Display for ProviderEndpoint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Subset of the OpenID Provider Metadata document this crate relies on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
	/// Issuer identifier; must equal the configured issuer.
	pub issuer: String,
	/// Authorization endpoint used by the authorization-code flows.
	pub authorization_endpoint: Url,
	/// Token endpoint used by every grant.
	pub token_endpoint: Url,
	/// Location of the provider's JSON Web Key Set.
	pub jwks_uri: Url,
	/// RFC 8628 device authorization endpoint, when supported.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_authorization_endpoint: Option<Url>,
	/// JWS algorithms the provider signs ID tokens with.
	#[serde(default)]
	pub id_token_signing_alg_values_supported: Vec<String>,
	/// PKCE methods the provider accepts.
	#[serde(default)]
	pub code_challenge_methods_supported: Vec<String>,
}

/// Discovery output: metadata plus the signing keys it points to.
#[derive(Clone, Debug)]
pub struct DiscoveredProvider {
	/// Provider metadata.
	pub metadata: ProviderMetadata,
	/// Signing keys published at `jwks_uri`.
	pub jwks: JwkSet,
}
impl DiscoveredProvider {
	/// Returns the device authorization endpoint or a configuration error when the provider
	/// does not support the device grant.
	pub fn device_authorization_endpoint(&self) -> Result<&Url> {
		self.metadata
			.device_authorization_endpoint
			.as_ref()
			.ok_or_else(|| crate::error::ConfigError::DeviceAuthorizationUnsupported.into())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn metadata_tolerates_missing_optional_fields() {
		let metadata: ProviderMetadata = serde_json::from_value(serde_json::json!({
			"issuer": "https://idp.example.com",
			"authorization_endpoint": "https://idp.example.com/auth",
			"token_endpoint": "https://idp.example.com/token",
			"jwks_uri": "https://idp.example.com/keys",
			"response_types_supported": ["code"],
		}))
		.expect("Minimal discovery document should parse.");

		assert!(metadata.device_authorization_endpoint.is_none());
		assert!(metadata.id_token_signing_alg_values_supported.is_empty());
	}

	#[test]
	fn endpoint_labels_are_lowercase() {
		assert_eq!(ProviderEndpoint::Token.to_string(), "token");
		assert_eq!(ProviderEndpoint::DeviceAuthorization.to_string(), "device authorization");
	}
}
