// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::ScopeSet, flows::common};

const STATE_LEN: usize = 32;
const NONCE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Flow-scoped authorization request state. Lives for one flow execution and is never stored.
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Anti-forgery value the redirect must echo.
	pub state: String,
	/// Value the ID token's `nonce` claim must equal.
	pub nonce: String,
	/// Redirect URI sent in the authorization request and again in the code exchange.
	pub redirect_uri: Url,
	/// URL the user opens to authorize.
	pub authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// Generates fresh state, nonce and PKCE values and builds the authorization URL.
	pub fn new(
		authorization_endpoint: &Url,
		client_id: &str,
		scopes: &ScopeSet,
		redirect_uri: Url,
		extra_params: &BTreeMap<String, String>,
	) -> Self {
		let state = common::random_string(STATE_LEN);
		let nonce = common::random_string(NONCE_LEN);
		let pkce = PkcePair::generate();
		let mut authorize_url = authorization_endpoint.clone();

		{
			let mut pairs = authorize_url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", client_id);
			pairs.append_pair("redirect_uri", redirect_uri.as_str());

			if !scopes.is_empty() {
				pairs.append_pair("scope", &scopes.normalized());
			}

			pairs.append_pair("state", &state);
			pairs.append_pair("nonce", &nonce);
			pairs.append_pair("code_challenge", &pkce.challenge);
			pairs.append_pair("code_challenge_method", pkce.method.as_str());

			for (key, value) in extra_params {
				pairs.append_pair(key, value);
			}
		}

		Self { state, nonce, redirect_uri, authorize_url, pkce }
	}

	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		self.pkce.method
	}

	pub(crate) fn pkce_verifier(&self) -> &str {
		&self.pkce.verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("authorize_url", &self.authorize_url.as_str())
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = common::random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

fn compute_pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
