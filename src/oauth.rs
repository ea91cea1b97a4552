//! Identity provider client: the OAuth facade over token exchanges, plus discovery and the
//! device authorization endpoint.

pub mod device;
pub mod discovery;

pub use device::*;
pub use discovery::*;
pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AsyncHttpClient, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet,
	EndpointSet, ExtraTokenFields, HttpClientError, HttpRequest, HttpResponse, PkceCodeVerifier,
	RedirectUrl, RefreshToken, RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername,
	Scope, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::{ConfigError, ProviderError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderEndpoint, ProviderErrorContext,
		ProviderMetadata, ProviderStrategy,
	},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Token response fields beyond RFC 6749 that OpenID Connect adds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenFields {
	/// Signed ID token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
}
impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;
type OidcClient = oauth2::Client<
	BasicErrorResponse,
	OidcTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Boxed future returned by [`OAuth2Facade`] operations.
pub type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Raw tokens as returned by the token endpoint, before ID token validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantedTokens {
	/// Access token.
	pub access_token: TokenSecret,
	/// Refresh token, when issued.
	pub refresh_token: Option<TokenSecret>,
	/// ID token, when issued.
	pub id_token: Option<TokenSecret>,
	/// Relative access token lifetime.
	pub expires_in: Option<StdDuration>,
	/// Instant the response was received.
	pub issued_at: OffsetDateTime,
}
impl GrantedTokens {
	fn from_response(response: &OidcTokenResponse) -> Self {
		Self {
			access_token: TokenSecret::new(response.access_token().secret().to_owned()),
			refresh_token: response
				.refresh_token()
				.map(|token| TokenSecret::new(token.secret().to_owned())),
			id_token: response.extra_fields().id_token.clone().map(TokenSecret::from),
			expires_in: response.expires_in(),
			issued_at: OffsetDateTime::now_utc(),
		}
	}
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		endpoint: ProviderEndpoint,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		endpoint: ProviderEndpoint,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(endpoint, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => unexpected(endpoint, meta, message),
			_ => unexpected(endpoint, meta, "unknown HTTP client failure"),
		}
	}
}

/// Operations the grant strategies need from the identity provider.
///
/// The trait is object safe so flows can run against a fake provider in tests.
pub trait OAuth2Facade: Send + Sync {
	/// Redeems an authorization code together with its PKCE verifier.
	fn exchange_authorization_code<'a>(
		&'a self,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a str,
	) -> FacadeFuture<'a, GrantedTokens>;

	/// Resource Owner Password Credentials grant.
	fn exchange_password<'a>(
		&'a self,
		username: &'a str,
		password: &'a str,
	) -> FacadeFuture<'a, GrantedTokens>;

	/// Client Credentials grant with caller-supplied extra form parameters.
	fn exchange_client_credentials<'a>(
		&'a self,
		extra_params: &'a BTreeMap<String, String>,
	) -> FacadeFuture<'a, GrantedTokens>;

	/// Refresh Token grant.
	fn refresh_token<'a>(&'a self, refresh_token: &'a str) -> FacadeFuture<'a, GrantedTokens>;

	/// Starts an RFC 8628 device authorization.
	fn request_device_authorization(&self) -> FacadeFuture<'_, DeviceAuthorization>;

	/// Polls the token endpoint once for a pending device authorization.
	fn poll_device_token<'a>(&'a self, device_code: &'a str) -> FacadeFuture<'a, DevicePoll>;
}

/// [`OAuth2Facade`] backed by the `oauth2` crate and a [`TokenHttpClient`].
pub struct BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: OidcClient,
	client: ClientCredentials,
	scopes: ScopeSet,
	token_endpoint: Url,
	device_endpoint: Option<Url>,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
}
impl<C, M> BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a facade for the descriptor's client against the discovered endpoints.
	pub fn from_provider(
		descriptor: &ProviderDescriptor,
		metadata: &ProviderMetadata,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
		strategy: Arc<dyn ProviderStrategy>,
	) -> Result<Self> {
		let client = ClientCredentials {
			id: descriptor.client_id.clone(),
			secret: descriptor.client_secret.clone(),
			method: descriptor.client_auth_method,
		};
		let mut oauth_client: OidcClient = oauth2::Client::new(ClientId::new(client.id.clone()))
			.set_auth_uri(AuthUrl::from_url(metadata.authorization_endpoint.clone()))
			.set_token_uri(TokenUrl::from_url(metadata.token_endpoint.clone()));

		if let Some(secret) = &client.secret {
			oauth_client =
				oauth_client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}
		if matches!(client.method, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self {
			oauth_client,
			client,
			scopes: descriptor.requested_scopes().map_err(ConfigError::from)?,
			token_endpoint: metadata.token_endpoint.clone(),
			device_endpoint: metadata.device_authorization_endpoint.clone(),
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy,
		})
	}

	fn augmented_form(&self, grant: GrantType) -> BTreeMap<String, String> {
		let mut form = BTreeMap::new();

		self.strategy.augment_token_request(grant, &mut form);

		form
	}

	fn map_token_error(
		&self,
		grant: GrantType,
		meta: Option<ResponseMetadata>,
		err: RequestTokenError<HttpClientError<C::TransportError>, BasicErrorResponse>,
	) -> Error {
		const ENDPOINT: ProviderEndpoint = ProviderEndpoint::Token;

		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) => {
				let mut ctx = ProviderErrorContext::new(grant)
					.with_oauth_error(response.error().as_ref().to_owned());

				if let Some(description) = response.error_description() {
					ctx = ctx.with_error_description(description.clone());
				}
				if let Some(status) = meta_status(meta) {
					ctx = ctx.with_http_status(status);
				}

				ProviderError::OAuth {
					endpoint: ENDPOINT,
					kind: self.strategy.classify_token_error(&ctx),
					error: response.error().as_ref().to_owned(),
					description: response.error_description().cloned(),
					status: meta_status(meta),
				}
				.into()
			},
			RequestTokenError::Request(error) =>
				self.error_mapper.map_transport_error(ENDPOINT, meta, error),
			RequestTokenError::Parse(source, _body) => ProviderError::ResponseParse {
				endpoint: ENDPOINT,
				source,
				status: meta_status(meta),
			}
			.into(),
			RequestTokenError::Other(message) => unexpected(ENDPOINT, meta, message),
		}
	}

	pub(crate) async fn execute(
		&self,
		endpoint: ProviderEndpoint,
		request: HttpRequest,
	) -> Result<HttpResponse> {
		execute(self.http_client.as_ref(), self.error_mapper.as_ref(), endpoint, request).await
	}
}
impl<C, M> OAuth2Facade for BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_authorization_code<'a>(
		&'a self,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a str,
	) -> FacadeFuture<'a, GrantedTokens> {
		const GRANT: GrantType = GrantType::AuthorizationCode;

		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(redirect_uri.to_owned())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let mut request = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url));

			for (key, value) in self.augmented_form(GRANT) {
				request = request.add_extra_param(key, value);
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_token_error(GRANT, meta.take(), err))?;

			Ok(GrantedTokens::from_response(&response))
		})
	}

	fn exchange_password<'a>(
		&'a self,
		username: &'a str,
		password: &'a str,
	) -> FacadeFuture<'a, GrantedTokens> {
		const GRANT: GrantType = GrantType::Password;

		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let username = ResourceOwnerUsername::new(username.to_owned());
			let password = ResourceOwnerPassword::new(password.to_owned());
			let mut request = self.oauth_client.exchange_password(&username, &password);

			for scope in self.scopes.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}
			for (key, value) in self.augmented_form(GRANT) {
				request = request.add_extra_param(key, value);
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_token_error(GRANT, meta.take(), err))?;

			Ok(GrantedTokens::from_response(&response))
		})
	}

	fn exchange_client_credentials<'a>(
		&'a self,
		extra_params: &'a BTreeMap<String, String>,
	) -> FacadeFuture<'a, GrantedTokens> {
		const GRANT: GrantType = GrantType::ClientCredentials;

		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut form = self.augmented_form(GRANT);
			let mut request = self.oauth_client.exchange_client_credentials();

			form.extend(extra_params.iter().map(|(k, v)| (k.clone(), v.clone())));

			for scope in self.scopes.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}
			for (key, value) in form {
				request = request.add_extra_param(key, value);
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_token_error(GRANT, meta.take(), err))?;

			Ok(GrantedTokens::from_response(&response))
		})
	}

	fn refresh_token<'a>(&'a self, refresh_token: &'a str) -> FacadeFuture<'a, GrantedTokens> {
		const GRANT: GrantType = GrantType::RefreshToken;

		Box::pin(async move {
			let meta = ResponseMetadataSlot::default();
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.to_owned());
			let mut request = self.oauth_client.exchange_refresh_token(&refresh_secret);

			for (key, value) in self.augmented_form(GRANT) {
				request = request.add_extra_param(key, value);
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_token_error(GRANT, meta.take(), err))?;

			Ok(GrantedTokens::from_response(&response))
		})
	}

	fn request_device_authorization(&self) -> FacadeFuture<'_, DeviceAuthorization> {
		Box::pin(async move {
			let endpoint =
				self.device_endpoint.as_ref().ok_or(ConfigError::DeviceAuthorizationUnsupported)?;
			let mut form = BTreeMap::from([("scope".to_owned(), self.scopes.normalized())]);

			form.extend(self.augmented_form(GrantType::DeviceCode));

			let request = self.client.form_request(endpoint, form)?;
			let response = self.execute(ProviderEndpoint::DeviceAuthorization, request).await?;

			device::parse_authorization(self.strategy.as_ref(), &response)
		})
	}

	fn poll_device_token<'a>(&'a self, device_code: &'a str) -> FacadeFuture<'a, DevicePoll> {
		const GRANT: GrantType = GrantType::DeviceCode;

		Box::pin(async move {
			let mut form = BTreeMap::from([
				("grant_type".to_owned(), GRANT.as_str().to_owned()),
				("device_code".to_owned(), device_code.to_owned()),
			]);

			form.extend(self.augmented_form(GRANT));

			let request = self.client.form_request(&self.token_endpoint, form)?;
			let response = self.execute(ProviderEndpoint::Token, request).await?;

			device::parse_poll(self.strategy.as_ref(), &response)
		})
	}
}
impl<C, M> Debug for BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BasicFacade")
			.field("client_id", &self.client.id)
			.field("client_secret_set", &self.client.secret.is_some())
			.field("scopes", &self.scopes)
			.field("token_endpoint", &self.token_endpoint.as_str())
			.finish()
	}
}

/// Facade over the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestFacade = BasicFacade<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Client authentication material for requests built outside the `oauth2` crate.
#[derive(Clone)]
struct ClientCredentials {
	id: String,
	secret: Option<TokenSecret>,
	method: ClientAuthMethod,
}
impl ClientCredentials {
	/// Builds a form POST carrying client authentication the way the `oauth2` crate does:
	/// HTTP Basic with URL-encoded credentials, or body parameters.
	fn form_request(&self, url: &Url, mut form: BTreeMap<String, String>) -> Result<HttpRequest> {
		let mut builder = oauth2::http::Request::builder()
			.method(oauth2::http::Method::POST)
			.uri(url.as_str())
			.header(oauth2::http::header::ACCEPT, "application/json")
			.header(oauth2::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded");

		match (&self.secret, self.method) {
			(Some(secret), ClientAuthMethod::ClientSecretBasic) => {
				let user =
					url::form_urlencoded::byte_serialize(self.id.as_bytes()).collect::<String>();
				let pass = url::form_urlencoded::byte_serialize(secret.expose().as_bytes())
					.collect::<String>();
				let encoded = base64::Engine::encode(
					&base64::engine::general_purpose::STANDARD,
					format!("{user}:{pass}"),
				);

				builder = builder
					.header(oauth2::http::header::AUTHORIZATION, format!("Basic {encoded}"));
			},
			(Some(secret), ClientAuthMethod::ClientSecretPost) => {
				form.insert("client_id".into(), self.id.clone());
				form.insert("client_secret".into(), secret.expose().to_owned());
			},
			(None, _) => {
				form.insert("client_id".into(), self.id.clone());
			},
		}

		let body = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(form).finish();

		builder.body(body.into_bytes()).map_err(|e| ConfigError::from(e).into())
	}
}

/// Builds a plain `GET` expecting JSON.
pub(crate) fn get_request(url: &Url) -> Result<HttpRequest> {
	oauth2::http::Request::builder()
		.method(oauth2::http::Method::GET)
		.uri(url.as_str())
		.header(oauth2::http::header::ACCEPT, "application/json")
		.body(Vec::new())
		.map_err(|e| ConfigError::from(e).into())
}

/// Sends one request through an instrumented handle, mapping transport failures.
pub(crate) async fn execute<C, M>(
	http_client: &C,
	error_mapper: &M,
	endpoint: ProviderEndpoint,
	request: HttpRequest,
) -> Result<HttpResponse>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let meta = ResponseMetadataSlot::default();
	let handle = http_client.with_metadata(meta.clone());

	handle
		.call(request)
		.await
		.map_err(|err| error_mapper.map_transport_error(endpoint, meta.take().as_ref(), err))
}

/// Deserializes a JSON body, keeping the path of the first mismatch.
pub(crate) fn parse_json<T>(endpoint: ProviderEndpoint, response: &HttpResponse) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
		ProviderError::ResponseParse {
			endpoint,
			source,
			status: Some(response.status().as_u16()),
		}
		.into()
	})
}

/// Rejects non-2xx responses from endpoints that have no OAuth error body.
pub(crate) fn ensure_success(endpoint: ProviderEndpoint, response: &HttpResponse) -> Result<()> {
	let status = response.status();

	if status.is_success() {
		return Ok(());
	}

	Err(ProviderError::Unexpected {
		endpoint,
		message: format!("HTTP {status}: {}", body_preview(response.body())),
		status: Some(status.as_u16()),
		retry_after: None,
	}
	.into())
}

pub(crate) fn body_preview(body: &[u8]) -> String {
	const LIMIT: usize = 128;

	let text = String::from_utf8_lossy(body);

	text.chars().take(LIMIT).collect()
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	endpoint: ProviderEndpoint,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return ProviderError::Unexpected {
			endpoint,
			message: "request timed out".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn unexpected(
	endpoint: ProviderEndpoint,
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> Error {
	ProviderError::Unexpected {
		endpoint,
		message: message.to_string(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn credentials(secret: Option<&str>, method: ClientAuthMethod) -> ClientCredentials {
		ClientCredentials {
			id: "kube cli".into(),
			secret: secret.map(TokenSecret::new),
			method,
		}
	}

	fn form_of(request: &HttpRequest) -> Vec<(String, String)> {
		url::form_urlencoded::parse(request.body()).into_owned().collect()
	}

	#[test]
	fn basic_auth_encodes_credentials_in_the_header() {
		let url = Url::parse("https://idp.example.com/device").expect("Fixture URL should parse.");
		let request = credentials(Some("s3:cret"), ClientAuthMethod::ClientSecretBasic)
			.form_request(&url, BTreeMap::from([("scope".into(), "openid".into())]))
			.expect("Form request should build.");
		let header = request
			.headers()
			.get(oauth2::http::header::AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.expect("Authorization header should be present.");
		let expected = base64::Engine::encode(
			&base64::engine::general_purpose::STANDARD,
			"kube+cli:s3%3Acret",
		);

		assert_eq!(header, format!("Basic {expected}"));
		assert_eq!(form_of(&request), vec![("scope".into(), "openid".into())]);
	}

	#[test]
	fn public_clients_send_client_id_in_the_body() {
		let url = Url::parse("https://idp.example.com/token").expect("Fixture URL should parse.");
		let request = credentials(None, ClientAuthMethod::ClientSecretBasic)
			.form_request(&url, BTreeMap::new())
			.expect("Form request should build.");

		assert!(request.headers().get(oauth2::http::header::AUTHORIZATION).is_none());
		assert_eq!(form_of(&request), vec![("client_id".into(), "kube cli".into())]);
	}

	#[test]
	fn post_auth_puts_the_secret_in_the_body() {
		let url = Url::parse("https://idp.example.com/token").expect("Fixture URL should parse.");
		let request = credentials(Some("s3cret"), ClientAuthMethod::ClientSecretPost)
			.form_request(&url, BTreeMap::new())
			.expect("Form request should build.");
		let form = form_of(&request);

		assert!(form.contains(&("client_secret".into(), "s3cret".into())));
		assert!(form.contains(&("client_id".into(), "kube cli".into())));
	}
}
