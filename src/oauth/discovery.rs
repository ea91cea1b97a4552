//! OpenID discovery: fetch the provider metadata document and its signing keys.

// crates.io
use jsonwebtoken::jwk::{Jwk, JwkSet};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ProviderError},
	http::TokenHttpClient,
	oauth::{self, TransportErrorMapper},
	provider::{DiscoveredProvider, ProviderDescriptor, ProviderEndpoint, ProviderMetadata},
};

#[derive(Deserialize)]
struct RawJwkSet {
	keys: Vec<serde_json::Value>,
}

/// Fetches `{issuer}/.well-known/openid-configuration` and the JWKS it references.
///
/// The document's `issuer` must equal the configured issuer byte for byte.
pub async fn discover<C, M>(
	http_client: &C,
	error_mapper: &M,
	descriptor: &ProviderDescriptor,
) -> Result<DiscoveredProvider>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let url = descriptor
		.discovery_url()
		.map_err(|source| ConfigError::InvalidEndpoint { endpoint: "discovery", source })?;
	let response = oauth::execute(
		http_client,
		error_mapper,
		ProviderEndpoint::Discovery,
		oauth::get_request(&url)?,
	)
	.await?;

	oauth::ensure_success(ProviderEndpoint::Discovery, &response)?;

	let metadata: ProviderMetadata = oauth::parse_json(ProviderEndpoint::Discovery, &response)?;

	if metadata.issuer != descriptor.issuer {
		return Err(ProviderError::IssuerMismatch {
			expected: descriptor.issuer.clone(),
			actual: metadata.issuer,
		}
		.into());
	}

	let response = oauth::execute(
		http_client,
		error_mapper,
		ProviderEndpoint::Jwks,
		oauth::get_request(&metadata.jwks_uri)?,
	)
	.await?;

	oauth::ensure_success(ProviderEndpoint::Jwks, &response)?;

	let raw: RawJwkSet = oauth::parse_json(ProviderEndpoint::Jwks, &response)?;
	let jwks = JwkSet { keys: usable_keys(raw.keys) };

	tracing::debug!(
		issuer = %metadata.issuer,
		keys = jwks.keys.len(),
		device_flow = metadata.device_authorization_endpoint.is_some(),
		"Provider discovered."
	);

	Ok(DiscoveredProvider { metadata, jwks })
}

/// Keeps the keys `jsonwebtoken` understands; encryption keys and exotic curves are skipped.
fn usable_keys(keys: Vec<serde_json::Value>) -> Vec<Jwk> {
	keys.into_iter()
		.filter_map(|value| match serde_json::from_value::<Jwk>(value) {
			Ok(jwk) => Some(jwk),
			Err(e) => {
				tracing::debug!(error = %e, "Skipping unsupported JWK.");

				None
			},
		})
		.collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn unsupported_keys_are_skipped() {
		let keys = vec![
			serde_json::json!({ "kty": "oct", "kid": "k1", "alg": "HS256", "k": "c2VjcmV0" }),
			serde_json::json!({ "kty": "unknown", "kid": "k2" }),
		];
		let usable = usable_keys(keys);

		assert_eq!(usable.len(), 1);
		assert_eq!(usable[0].common.key_id.as_deref(), Some("k1"));
	}
}
