//! ID token validation against the provider's published signing keys.
//!
//! Every check runs even after an earlier one failed, so a rejected token reports all of its
//! problems at once.

// std
use std::collections::HashSet;
// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey, Validation,
	jwk::{Jwk, JwkSet},
};
// self
use crate::{
	_prelude::*,
	provider::{DiscoveredProvider, ProviderDescriptor},
};

/// One failed ID token check.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenCheck {
	/// The token is not a decodable JWS compact serialization.
	#[error("ID token is malformed: {reason}.")]
	Malformed {
		/// Decoder message.
		reason: String,
	},
	/// The provider issued no ID token where one is required.
	#[error("The token response did not include an ID token.")]
	MissingIdToken,
	/// The header names an algorithm the provider does not advertise.
	#[error("ID token is signed with unsupported algorithm {alg}.")]
	UnsupportedAlgorithm {
		/// Header `alg` value.
		alg: String,
	},
	/// No published key matches the header.
	#[error("No signing key matches key ID {}.", .kid.as_deref().unwrap_or("<none>"))]
	UnknownKey {
		/// Header `kid` value.
		kid: Option<String>,
	},
	/// The signature does not verify with the matching key.
	#[error("ID token signature is invalid.")]
	Signature,
	/// The `iss` claim differs from the configured issuer.
	#[error("ID token issuer `{actual}` does not match `{expected}`.")]
	Issuer {
		/// Configured issuer.
		expected: String,
		/// Claimed issuer.
		actual: String,
	},
	/// The `aud` claim does not contain the client identifier.
	#[error("ID token audience does not contain client `{expected}`.")]
	Audience {
		/// Configured client identifier.
		expected: String,
	},
	/// The `exp` claim is missing or not in the future.
	#[error("ID token is expired.")]
	Expired {
		/// Claimed expiry as a Unix timestamp.
		exp: Option<i64>,
	},
	/// The `nonce` claim differs from the one sent in the authorization request.
	#[error("ID token nonce does not match the authorization request.")]
	Nonce,
}

/// ID token rejection carrying every failed check, in evaluation order.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error(
	"ID token failed validation: {}",
	.failures.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
)]
pub struct TokenValidationError {
	/// Failed checks; never empty.
	pub failures: Vec<TokenCheck>,
}
impl TokenValidationError {
	/// Builds an error for a single failed check.
	pub fn single(check: TokenCheck) -> Self {
		Self { failures: vec![check] }
	}

	/// Returns `true` when `predicate` matches any failed check.
	pub fn any(&self, predicate: impl Fn(&TokenCheck) -> bool) -> bool {
		self.failures.iter().any(predicate)
	}
}
impl From<TokenCheck> for TokenValidationError {
	fn from(check: TokenCheck) -> Self {
		Self::single(check)
	}
}

/// The `aud` claim, which may be a single string or an array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
	/// `"aud": "client"`.
	Single(String),
	/// `"aud": ["client", "other"]`.
	Multiple(Vec<String>),
}
impl Audience {
	/// Returns `true` when `client_id` is one of the audiences.
	pub fn contains(&self, client_id: &str) -> bool {
		match self {
			Self::Single(aud) => aud == client_id,
			Self::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
		}
	}
}
impl Default for Audience {
	fn default() -> Self {
		Self::Multiple(Vec::new())
	}
}

/// Claims of a validated ID token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
	/// Issuer.
	#[serde(default)]
	pub iss: String,
	/// Subject.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
	/// Audience.
	#[serde(default)]
	pub aud: Audience,
	/// Expiry as a Unix timestamp.
	#[serde(default, with = "numeric_date")]
	pub exp: Option<i64>,
	/// Issued-at as a Unix timestamp.
	#[serde(default, with = "numeric_date")]
	pub iat: Option<i64>,
	/// Nonce echoed from the authorization request.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<String>,
	/// Every other claim (email, groups, ...).
	#[serde(flatten)]
	pub additional: serde_json::Map<String, serde_json::Value>,
}
impl IdTokenClaims {
	/// Expiry as an instant, when present and representable.
	pub fn expires_at(&self) -> Option<OffsetDateTime> {
		self.exp.and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
	}
}

/// Verifies ID tokens for one discovered provider.
#[derive(Clone, Debug)]
pub struct TokenValidator {
	jwks: JwkSet,
	algorithms: Vec<Algorithm>,
}
impl TokenValidator {
	/// Creates a validator trusting `jwks` for the given algorithms.
	pub fn new(jwks: JwkSet, algorithms: Vec<Algorithm>) -> Self {
		Self { jwks, algorithms }
	}

	/// Creates a validator from discovery output.
	///
	/// Algorithms come from `id_token_signing_alg_values_supported`; `RS256` is assumed when
	/// the provider lists none.
	pub fn for_provider(provider: &DiscoveredProvider) -> Self {
		let mut algorithms = provider
			.metadata
			.id_token_signing_alg_values_supported
			.iter()
			.filter_map(|alg| Algorithm::from_str(alg).ok())
			.collect::<Vec<_>>();

		if algorithms.is_empty() {
			algorithms.push(Algorithm::RS256);
		}

		Self::new(provider.jwks.clone(), algorithms)
	}

	/// Validates `raw` at the current instant.
	pub fn validate(
		&self,
		raw: &str,
		descriptor: &ProviderDescriptor,
		expected_nonce: Option<&str>,
	) -> Result<IdTokenClaims, TokenValidationError> {
		self.validate_at(raw, descriptor, expected_nonce, OffsetDateTime::now_utc())
	}

	/// Validates `raw` as of `now`.
	pub fn validate_at(
		&self,
		raw: &str,
		descriptor: &ProviderDescriptor,
		expected_nonce: Option<&str>,
		now: OffsetDateTime,
	) -> Result<IdTokenClaims, TokenValidationError> {
		let header = jsonwebtoken::decode_header(raw)
			.map_err(|e| TokenCheck::Malformed { reason: e.to_string() })?;
		let claims = decode_unverified(raw)?;
		let mut failures = Vec::new();

		if let Err(check) = self.verify_signature(raw, &header) {
			failures.push(check);
		}
		if claims.iss != descriptor.issuer {
			failures.push(TokenCheck::Issuer {
				expected: descriptor.issuer.clone(),
				actual: claims.iss.clone(),
			});
		}
		if !claims.aud.contains(&descriptor.client_id) {
			failures.push(TokenCheck::Audience { expected: descriptor.client_id.clone() });
		}
		if !claims.exp.is_some_and(|exp| exp > now.unix_timestamp()) {
			failures.push(TokenCheck::Expired { exp: claims.exp });
		}
		if let Some(expected) = expected_nonce
			&& claims.nonce.as_deref() != Some(expected)
		{
			failures.push(TokenCheck::Nonce);
		}

		if failures.is_empty() {
			Ok(claims)
		} else {
			tracing::debug!(failures = ?failures, "ID token rejected.");

			Err(TokenValidationError { failures })
		}
	}

	fn verify_signature(&self, raw: &str, header: &jsonwebtoken::Header) -> Result<(), TokenCheck> {
		if !self.algorithms.contains(&header.alg) {
			return Err(TokenCheck::UnsupportedAlgorithm { alg: format!("{:?}", header.alg) });
		}

		let candidates = self.candidate_keys(header.kid.as_deref());

		if candidates.is_empty() {
			return Err(TokenCheck::UnknownKey { kid: header.kid.clone() });
		}

		let mut validation = Validation::new(header.alg);

		validation.required_spec_claims = HashSet::new();
		validation.validate_exp = false;
		validation.validate_aud = false;

		let verified = candidates.into_iter().filter_map(|jwk| DecodingKey::from_jwk(jwk).ok()).any(
			|key| jsonwebtoken::decode::<serde_json::Value>(raw, &key, &validation).is_ok(),
		);

		if verified { Ok(()) } else { Err(TokenCheck::Signature) }
	}

	fn candidate_keys(&self, kid: Option<&str>) -> Vec<&Jwk> {
		match kid {
			Some(kid) => self.jwks.find(kid).into_iter().collect(),
			None => self.jwks.keys.iter().collect(),
		}
	}
}

fn decode_unverified(raw: &str) -> Result<IdTokenClaims, TokenCheck> {
	let mut validation = Validation::default();

	validation.insecure_disable_signature_validation();
	validation.required_spec_claims = HashSet::new();
	validation.validate_exp = false;
	validation.validate_aud = false;

	jsonwebtoken::decode::<IdTokenClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
		.map(|data| data.claims)
		.map_err(|e| TokenCheck::Malformed { reason: e.to_string() })
}

/// NumericDate values may be integers or floats on the wire.
mod numeric_date {
	// crates.io
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Int(i64),
		Float(f64),
	}

	pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		value.serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
			Raw::Int(value) => value,
			Raw::Float(value) => value as i64,
		}))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::{EncodingKey, Header};
	// self
	use super::*;

	const SECRET: &[u8] = b"oidc-login-test-signing-secret-00001";
	const SECRET_B64: &str = "b2lkYy1sb2dpbi10ZXN0LXNpZ25pbmctc2VjcmV0LTAwMDAx";
	const ISSUER: &str = "https://idp.example.com";
	const CLIENT_ID: &str = "kubernetes";
	const NOW: i64 = 1_750_000_000;

	fn validator() -> TokenValidator {
		let jwks: JwkSet = serde_json::from_value(serde_json::json!({
			"keys": [{ "kty": "oct", "kid": "test-key", "alg": "HS256", "k": SECRET_B64 }]
		}))
		.expect("Test JWKS should parse.");

		TokenValidator::new(jwks, vec![Algorithm::HS256])
	}

	fn descriptor() -> ProviderDescriptor {
		ProviderDescriptor::builder(ISSUER, CLIENT_ID)
			.build()
			.expect("Descriptor fixture should build.")
	}

	fn good_claims() -> serde_json::Value {
		serde_json::json!({
			"iss": ISSUER,
			"sub": "alice",
			"aud": CLIENT_ID,
			"exp": NOW + 3_600,
			"iat": NOW,
			"nonce": "expected-nonce",
			"email": "alice@example.com",
		})
	}

	fn mint(claims: &serde_json::Value) -> String {
		let mut header = Header::new(Algorithm::HS256);

		header.kid = Some("test-key".into());

		jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SECRET))
			.expect("Test token should encode.")
	}

	fn validate(token: &str) -> Result<IdTokenClaims, TokenValidationError> {
		validator().validate_at(
			token,
			&descriptor(),
			Some("expected-nonce"),
			OffsetDateTime::from_unix_timestamp(NOW).expect("Fixture instant should be valid."),
		)
	}

	fn with(field: &str, value: serde_json::Value) -> String {
		let mut claims = good_claims();

		claims[field] = value;

		mint(&claims)
	}

	#[test]
	fn valid_token_passes_and_keeps_extra_claims() {
		let claims = validate(&mint(&good_claims())).expect("Valid token should pass.");

		assert_eq!(claims.sub.as_deref(), Some("alice"));
		assert_eq!(claims.additional["email"], "alice@example.com");
		assert_eq!(claims.expires_at().map(OffsetDateTime::unix_timestamp), Some(NOW + 3_600));
	}

	#[test]
	fn wrong_issuer_is_reported_alone() {
		let err = validate(&with("iss", "https://evil.example.com".into()))
			.expect_err("Wrong issuer must fail.");

		assert_eq!(err.failures, vec![TokenCheck::Issuer {
			expected: ISSUER.into(),
			actual: "https://evil.example.com".into()
		}]);
	}

	#[test]
	fn wrong_audience_is_reported_alone() {
		let err = validate(&with("aud", serde_json::json!(["other-client", "another"])))
			.expect_err("Wrong audience must fail.");

		assert_eq!(err.failures, vec![TokenCheck::Audience { expected: CLIENT_ID.into() }]);
	}

	#[test]
	fn expired_token_is_reported_alone() {
		let err = validate(&with("exp", (NOW - 1).into())).expect_err("Expired token must fail.");

		assert_eq!(err.failures, vec![TokenCheck::Expired { exp: Some(NOW - 1) }]);
	}

	#[test]
	fn nonce_mismatch_is_reported_alone() {
		let err = validate(&with("nonce", "replayed".into())).expect_err("Wrong nonce must fail.");

		assert_eq!(err.failures, vec![TokenCheck::Nonce]);
	}

	#[test]
	fn every_check_is_evaluated() {
		let token = mint(&serde_json::json!({
			"iss": "https://evil.example.com",
			"aud": "other-client",
			"exp": NOW - 10,
			"nonce": "replayed",
		}));
		let err = validate(&token).expect_err("Token with four defects must fail.");

		assert_eq!(err.failures.len(), 4);
		assert!(err.to_string().starts_with("ID token failed validation: ID token issuer"));
	}

	#[test]
	fn tampered_signature_fails() {
		let token = mint(&good_claims());
		let (signed, _) = token.rsplit_once('.').expect("Token should contain a signature.");
		let forged = format!("{signed}.AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
		let err = validate(&forged).expect_err("Forged signature must fail.");

		assert_eq!(err.failures, vec![TokenCheck::Signature]);
	}

	#[test]
	fn unknown_kid_and_algorithm_are_distinct() {
		let mut header = Header::new(Algorithm::HS256);

		header.kid = Some("rotated-away".into());

		let unknown =
			jsonwebtoken::encode(&header, &good_claims(), &EncodingKey::from_secret(SECRET))
				.expect("Test token should encode.");
		let err = validate(&unknown).expect_err("Unknown key must fail.");

		assert_eq!(err.failures, vec![TokenCheck::UnknownKey { kid: Some("rotated-away".into()) }]);

		let hs384 = jsonwebtoken::encode(
			&Header::new(Algorithm::HS384),
			&good_claims(),
			&EncodingKey::from_secret(SECRET),
		)
		.expect("Test token should encode.");
		let err = validate(&hs384).expect_err("Unadvertised algorithm must fail.");

		assert!(err.any(|check| matches!(check, TokenCheck::UnsupportedAlgorithm { .. })));
	}

	#[test]
	fn nonce_is_ignored_when_not_expected() {
		let token = with("nonce", serde_json::Value::Null);
		let claims = validator()
			.validate_at(
				&token,
				&descriptor(),
				None,
				OffsetDateTime::from_unix_timestamp(NOW).expect("Fixture instant should be valid."),
			)
			.expect("Token without nonce should pass when none was sent.");

		assert!(claims.nonce.is_none());
	}

	#[test]
	fn garbage_is_malformed() {
		let err = validate("not-a-jwt").expect_err("Garbage must fail.");

		assert!(matches!(err.failures.as_slice(), [TokenCheck::Malformed { .. }]));
	}
}
