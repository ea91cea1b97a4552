#![allow(dead_code)]

// std
use std::{
	collections::HashMap,
	io,
	sync::{Arc, Mutex},
	time::{SystemTime, UNIX_EPOCH},
};
// crates.io
use httpmock::{Mock, prelude::*};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
// self
use oidc_login::{
	error::Error,
	flows::ReqwestAuthenticator,
	http::ReqwestHttpClient,
	interaction::{Interaction, Prompt, PromptFuture},
	oauth::DeviceAuthorization,
	provider::ProviderDescriptor,
	url::Url,
};

pub const CLIENT_ID: &str = "kubernetes";
pub const KEY_ID: &str = "test-hs256";
pub const SIGNING_SECRET: &[u8] = b"oidc-login-test-signing-secret-00001";
/// Base64url form of [`SIGNING_SECRET`], as published in the JWKS.
pub const SIGNING_SECRET_B64: &str = "b2lkYy1sb2dpbi10ZXN0LXNpZ25pbmctc2VjcmV0LTAwMDAx";

pub fn now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System clock should be after the Unix epoch.")
		.as_secs() as i64
}

/// Identity provider served by httpmock.
#[derive(Clone)]
pub struct MockProvider {
	pub server: Arc<MockServer>,
}
impl MockProvider {
	pub async fn start() -> Self {
		Self { server: Arc::new(MockServer::start_async().await) }
	}

	pub fn issuer(&self) -> String {
		self.server.base_url()
	}

	pub fn descriptor(&self) -> ProviderDescriptor {
		ProviderDescriptor::builder(self.issuer(), CLIENT_ID)
			.extra_scope("email")
			.build()
			.expect("Mock provider descriptor should build.")
	}

	pub fn discovery_document(&self) -> Value {
		json!({
			"issuer": self.issuer(),
			"authorization_endpoint": self.server.url("/authorize"),
			"token_endpoint": self.server.url("/token"),
			"jwks_uri": self.server.url("/keys"),
			"device_authorization_endpoint": self.server.url("/device"),
			"id_token_signing_alg_values_supported": ["HS256"],
			"code_challenge_methods_supported": ["S256"],
		})
	}

	/// Mocks discovery and the JWKS; returns both mocks so callers can count hits.
	pub async fn mock_discovery(&self) -> (Mock<'_>, Mock<'_>) {
		let document = self.discovery_document();
		let discovery = self
			.server
			.mock_async(|when, then| {
				when.method(GET).path("/.well-known/openid-configuration");
				then.status(200).json_body(document);
			})
			.await;
		let keys = self
			.server
			.mock_async(|when, then| {
				when.method(GET).path("/keys");
				then.status(200).json_body(json!({
					"keys": [{
						"kty": "oct",
						"kid": KEY_ID,
						"alg": "HS256",
						"use": "sig",
						"k": SIGNING_SECRET_B64,
					}],
				}));
			})
			.await;

		(discovery, keys)
	}

	/// Mocks the token endpoint for requests carrying `grant_type`.
	pub async fn mock_token(&self, grant_type: &str, status: u16, body: Value) -> Mock<'_> {
		let form_fragment = format!("grant_type={grant_type}");

		self.server
			.mock_async(|when, then| {
				when.method(POST).path("/token").body_includes(form_fragment);
				then.status(status).header("content-type", "application/json").json_body(body);
			})
			.await
	}

	/// Same as [`mock_token`](Self::mock_token), usable from synchronous callbacks that run on
	/// the test runtime. The mock is registered from a helper thread through httpmock's
	/// blocking API, whose request builders cannot cross an `.await` inside a `Send` future.
	pub fn mock_token_blocking(&self, grant_type: &str, status: u16, body: Value) {
		let provider = self.clone();
		let form_fragment = format!("grant_type={grant_type}");

		std::thread::spawn(move || {
			provider.server.mock(|when, then| {
				when.method(POST).path("/token").body_includes(form_fragment);
				then.status(status).header("content-type", "application/json").json_body(body);
			});
		})
		.join()
		.expect("Mock registration thread should not panic.");
	}

	/// Claims of a token that passes validation for this provider.
	pub fn claims(&self, nonce: Option<&str>) -> Value {
		let now = now();
		let mut claims = json!({
			"iss": self.issuer(),
			"sub": "user-1",
			"aud": CLIENT_ID,
			"iat": now,
			"exp": now + 3600,
			"email": "user@example.com",
		});

		if let Some(nonce) = nonce {
			claims["nonce"] = Value::from(nonce);
		}

		claims
	}

	pub fn id_token(&self, nonce: Option<&str>) -> String {
		mint(&self.claims(nonce))
	}
}

pub fn mint(claims: &Value) -> String {
	let header = Header { kid: Some(KEY_ID.into()), ..Header::new(Algorithm::HS256) };

	jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SIGNING_SECRET))
		.expect("Test ID token should encode.")
}

pub fn token_response(
	access_token: &str,
	id_token: Option<&str>,
	refresh_token: Option<&str>,
) -> Value {
	let mut body = json!({
		"access_token": access_token,
		"token_type": "Bearer",
		"expires_in": 3600,
	});

	if let Some(id_token) = id_token {
		body["id_token"] = Value::from(id_token);
	}
	if let Some(refresh_token) = refresh_token {
		body["refresh_token"] = Value::from(refresh_token);
	}

	body
}

pub fn oauth_error(error: &str) -> Value {
	json!({ "error": error, "error_description": format!("{error} (mock)") })
}

pub fn authenticator(interaction: Arc<dyn Interaction>) -> ReqwestAuthenticator {
	ReqwestAuthenticator::new(ReqwestHttpClient::default()).with_interaction(interaction)
}

/// Scripted user: answers prompts from a table and records what it was shown.
#[derive(Clone, Default)]
pub struct ScriptedUser {
	pub answers: HashMap<&'static str, String>,
	pub prompts: Arc<Mutex<Vec<Prompt>>>,
	pub shown_urls: Arc<Mutex<Vec<String>>>,
	pub device_codes: Arc<Mutex<Vec<String>>>,
}
impl ScriptedUser {
	pub fn answering(mut self, prompt: Prompt, answer: impl Into<String>) -> Self {
		self.answers.insert(prompt.label(), answer.into());

		self
	}

	pub fn prompts(&self) -> Vec<Prompt> {
		self.prompts.lock().expect("Prompt log lock should not be poisoned.").clone()
	}
}
impl Interaction for ScriptedUser {
	fn open_browser(&self, _url: &str, _command: Option<&str>) -> io::Result<()> {
		Err(io::Error::other("No browser in tests."))
	}

	fn show_authorization_url(&self, url: &str) {
		self.shown_urls.lock().expect("URL log lock should not be poisoned.").push(url.into());
	}

	fn show_device_code(&self, authorization: &DeviceAuthorization) {
		self.device_codes
			.lock()
			.expect("Device code log lock should not be poisoned.")
			.push(authorization.user_code.clone());
	}

	fn prompt(&self, prompt: Prompt) -> PromptFuture<'_> {
		self.prompts.lock().expect("Prompt log lock should not be poisoned.").push(prompt);

		let answer = self.answers.get(prompt.label()).cloned();

		Box::pin(async move {
			answer.ok_or_else(|| {
				Error::Interaction(io::Error::other(format!("No scripted answer for {prompt:?}.")))
			})
		})
	}
}

/// What the fake browser sends back to the local listener.
#[derive(Clone, Debug)]
pub enum BrowserReply {
	/// Echo the request's state and send this code.
	Code(&'static str),
	/// Send a code with a forged state.
	ForgedState(&'static str),
	/// Send an OAuth error instead of a code.
	Denied(&'static str),
}

/// Browser stand-in: reads the authorization request, prepares the token endpoint response
/// for the nonce it carries, then calls the redirect URI.
#[derive(Clone)]
pub struct FakeBrowser {
	pub provider: MockProvider,
	pub reply: BrowserReply,
	/// Overrides the nonce minted into the ID token.
	pub id_token_nonce: Option<&'static str>,
	pub opened: Arc<Mutex<Vec<String>>>,
}
impl FakeBrowser {
	pub fn new(provider: MockProvider, reply: BrowserReply) -> Self {
		Self { provider, reply, id_token_nonce: None, opened: Default::default() }
	}

	pub fn opened(&self) -> Vec<String> {
		self.opened.lock().expect("Browser log lock should not be poisoned.").clone()
	}
}
impl Interaction for FakeBrowser {
	fn open_browser(&self, url: &str, _command: Option<&str>) -> io::Result<()> {
		self.opened.lock().expect("Browser log lock should not be poisoned.").push(url.into());

		let request = Url::parse(url).map_err(io::Error::other)?;
		let params = request.query_pairs().into_owned().collect::<HashMap<_, _>>();
		let param = |name: &str| {
			params.get(name).cloned().ok_or_else(|| io::Error::other(format!("missing {name}")))
		};
		let state = param("state")?;
		let nonce = param("nonce")?;
		let redirect_uri = param("redirect_uri")?;
		let provider = self.provider.clone();
		let reply = self.reply.clone();
		let id_token_nonce = self.id_token_nonce.map(str::to_owned).unwrap_or(nonce);

		let id_token = provider.id_token(Some(&id_token_nonce));

		provider.mock_token_blocking(
			"authorization_code",
			200,
			token_response("browser-access", Some(&id_token), Some("browser-refresh")),
		);

		tokio::spawn(async move {
			let query = match reply {
				BrowserReply::Code(code) => vec![("code", code.to_owned()), ("state", state)],
				BrowserReply::ForgedState(code) =>
					vec![("code", code.to_owned()), ("state", format!("{state}-forged"))],
				BrowserReply::Denied(error) => vec![("error", error.to_owned()), ("state", state)],
			};
			let callback = Url::parse_with_params(&redirect_uri, query)
				.expect("Redirect URI from the authorization request should parse.");

			// The listener's reply is irrelevant here; the flow reports the outcome.
			let _ = oidc_login::reqwest::get(callback).await;
		});

		Ok(())
	}

	fn show_authorization_url(&self, url: &str) {
		self.opened.lock().expect("Browser log lock should not be poisoned.").push(url.into());
	}

	fn show_device_code(&self, _authorization: &DeviceAuthorization) {}

	fn prompt(&self, prompt: Prompt) -> PromptFuture<'_> {
		Box::pin(async move {
			Err(Error::Interaction(io::Error::other(format!("Unexpected prompt {prompt:?}."))))
		})
	}
}
