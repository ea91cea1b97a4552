//! Authentication engine: select one grant, run it, and validate what the provider returned.

pub mod auth_code;
pub mod client_credentials;
pub mod common;
pub mod device_code;
pub mod options;
pub mod password;
pub mod refresh;

pub use auth_code::*;
pub use client_credentials::*;
pub use common::*;
pub use device_code::*;
pub use options::*;
pub use password::*;

// self
use crate::{
	_prelude::*,
	auth::{TokenSet, TokenSetBuilderError},
	error::{ConfigError, ProviderError},
	http::TokenHttpClient,
	interaction::{ConsoleInteraction, Interaction},
	oauth::{self, BasicFacade, GrantedTokens, TransportErrorMapper},
	obs::{self, FlowOutcome, FlowSpan},
	provider::{
		DefaultProviderStrategy, DiscoveredProvider, ProviderDescriptor, ProviderEndpoint,
		ProviderStrategy,
	},
	validate::{IdTokenClaims, TokenCheck, TokenValidationError, TokenValidator},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Authenticator specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestAuthenticator = Authenticator<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Validated result of one grant or refresh.
#[derive(Clone, Debug)]
pub struct AuthResult {
	/// Tokens, with the expiry taken from the ID token when there is one.
	pub tokens: TokenSet,
	/// Claims of the validated ID token.
	pub claims: Option<IdTokenClaims>,
}

/// Runs grants against the provider named by a [`ProviderDescriptor`].
///
/// The authenticator owns the transport, the provider strategy used to classify error bodies,
/// and the [`Interaction`] that interactive grants talk to. It keeps no per-provider state, so
/// one instance can serve any number of descriptors.
#[derive(Clone)]
pub struct Authenticator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
	interaction: Arc<dyn Interaction>,
}
impl<C, M> Authenticator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an authenticator over a caller-provided transport and error mapper.
	pub fn with_http_client(
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy: Arc::new(DefaultProviderStrategy),
			interaction: Arc::new(ConsoleInteraction),
		}
	}

	/// Replaces the provider strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the browser/terminal interaction.
	pub fn with_interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
		self.interaction = interaction;

		self
	}

	/// Fetches discovery metadata and signing keys for `descriptor`.
	pub async fn discover(&self, descriptor: &ProviderDescriptor) -> Result<DiscoveredProvider> {
		oauth::discover(self.http_client.as_ref(), self.error_mapper.as_ref(), descriptor).await
	}

	/// Token endpoint client for `descriptor` against the discovered endpoints.
	pub fn facade(
		&self,
		descriptor: &ProviderDescriptor,
		provider: &DiscoveredProvider,
	) -> Result<BasicFacade<C, M>> {
		BasicFacade::from_provider(
			descriptor,
			&provider.metadata,
			Arc::clone(&self.http_client),
			Arc::clone(&self.error_mapper),
			Arc::clone(&self.strategy),
		)
	}

	/// Runs the single grant selected in `options` and validates the result.
	///
	/// An empty or ambiguous option set fails with [`ConfigError`] before any network or
	/// listener activity.
	pub async fn authenticate(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		options: &GrantOptionSet,
	) -> Result<AuthResult> {
		let strategy = options.select()?;

		self.authenticate_with(cancel, descriptor, strategy).await
	}

	/// Runs `strategy` from discovery to a validated result.
	pub async fn authenticate_with(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		strategy: &dyn GrantStrategy,
	) -> Result<AuthResult> {
		strategy.validate()?;

		let provider = common::until_cancelled(cancel, self.discover(descriptor)).await?;

		self.run_grant(cancel, descriptor, &provider, strategy).await
	}

	/// Runs `strategy` against an already discovered provider.
	pub async fn run_grant(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		provider: &DiscoveredProvider,
		strategy: &dyn GrantStrategy,
	) -> Result<AuthResult> {
		let kind = strategy.kind();
		let span = FlowSpan::new(kind, "run_grant");

		obs::record_flow_outcome(kind, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let facade = self.facade(descriptor, provider)?;
				let ctx = FlowContext {
					descriptor,
					provider,
					facade: &facade,
					interaction: self.interaction.as_ref(),
					cancel,
				};
				let GrantOutcome { tokens, nonce } =
					common::until_cancelled(cancel, strategy.execute(&ctx)).await?;
				let require_id_token = strategy.requires_id_token();

				validated(descriptor, provider, tokens, nonce.as_deref(), require_id_token)
			})
			.await;

		obs::record_flow_result(kind, &result);

		match &result {
			Ok(auth) => tracing::info!(
				flow = %kind,
				expires_at = %auth.tokens.expires_at,
				"Authentication succeeded."
			),
			Err(e) => tracing::debug!(flow = %kind, error = %e, "Authentication failed."),
		}

		result
	}
}
#[cfg(feature = "reqwest")]
impl Authenticator<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an authenticator with its own reqwest transport.
	pub fn new(http_client: ReqwestHttpClient) -> Self {
		Self::with_http_client(http_client, ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for Authenticator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Authenticator").finish_non_exhaustive()
	}
}

/// Validates the ID token (when present or required) and normalizes the response.
fn validated(
	descriptor: &ProviderDescriptor,
	provider: &DiscoveredProvider,
	tokens: GrantedTokens,
	nonce: Option<&str>,
	require_id_token: bool,
) -> Result<AuthResult> {
	let claims = match &tokens.id_token {
		Some(raw) =>
			Some(TokenValidator::for_provider(provider).validate(raw.expose(), descriptor, nonce)?),
		None if require_id_token =>
			return Err(TokenValidationError::single(TokenCheck::MissingIdToken).into()),
		None => None,
	};
	let tokens = token_set(tokens, claims.as_ref())?;

	Ok(AuthResult { tokens, claims })
}

/// Expiry is the ID token `exp` when there is an ID token, otherwise `expires_in`.
fn token_set(tokens: GrantedTokens, claims: Option<&IdTokenClaims>) -> Result<TokenSet> {
	let mut builder =
		TokenSet::builder().access_token(tokens.access_token.expose()).issued_at(tokens.issued_at);

	if let Some(id_token) = &tokens.id_token {
		builder = builder.id_token(id_token.expose());
	}
	if let Some(refresh_token) = &tokens.refresh_token {
		builder = builder.refresh_token(refresh_token.expose());
	}

	builder = match (claims.and_then(IdTokenClaims::expires_at), tokens.expires_in) {
		(Some(instant), _) => builder.expires_at(instant),
		(None, Some(lifetime)) => builder.expires_in(
			Duration::try_from(lifetime).map_err(|_| missing_expiry("expires_in is out of range"))?,
		),
		(None, None) => return Err(missing_expiry("the response carries no expiry")),
	};

	builder.build().map_err(|e| match e {
		TokenSetBuilderError::ExpiryOutOfRange => missing_expiry("expires_in is out of range"),
		other => ConfigError::from(other).into(),
	})
}

fn missing_expiry(message: &str) -> Error {
	ProviderError::Unexpected {
		endpoint: ProviderEndpoint::Token,
		message: message.into(),
		status: None,
		retry_after: None,
	}
	.into()
}
