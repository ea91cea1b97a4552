//! Cache-first credential plugin for cluster-access clients.
//!
//! A call first consults the [`TokenCache`]. A usable entry is returned without touching the
//! network. An expired entry holding a refresh token is refreshed once; if that fails for any
//! reason other than cancellation, the selected grant runs once instead. Every freshly
//! obtained token set is written back to the cache before it is returned.
//!
//! Calls for the same cache key inside one process are serialized, so a second caller waits
//! for and then reuses the first caller's result.

pub mod exec_credential;
/// Counters for cache hits, refreshes and full flows.
pub mod metrics;

pub use exec_credential::*;
pub use metrics::*;

// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	error::ConfigError,
	flows::{Authenticator, GrantOptionSet, GrantStrategy, common},
	http::{TlsClientConfig, TokenHttpClient},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{DiscoveredProvider, ProviderDescriptor},
	store::{CacheKey, TokenCache},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper, store::FileCache};

/// Cached token sets must stay valid at least this long to be reused.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::seconds(10);

/// Credential plugin specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestCredentialPlugin =
	CredentialPlugin<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Everything one plugin invocation needs, fully resolved by the caller.
#[derive(Clone, Debug)]
pub struct CredentialPluginInput {
	/// Provider to authenticate against.
	pub provider: ProviderDescriptor,
	/// The grant to run when the cache cannot serve the call.
	pub grant_options: GrantOptionSet,
	/// Directory the token cache lives in.
	pub token_cache_dir: PathBuf,
	/// Outbound TLS settings for provider requests.
	pub tls: TlsClientConfig,
}

/// Where a returned token set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenSource {
	/// Reused from the cache.
	Cache,
	/// Renewed with the cached refresh token.
	Refresh,
	/// Obtained by running the selected grant.
	Grant,
}

/// Token set handed back by [`CredentialPlugin::get_token`].
#[derive(Clone, Debug)]
pub struct PluginOutput {
	/// Usable tokens.
	pub tokens: TokenSet,
	/// How the call was served.
	pub source: TokenSource,
}
impl PluginOutput {
	/// Exec credential wrapping the bearer token.
	pub fn exec_credential(&self) -> ExecCredential {
		ExecCredential::from_tokens(&self.tokens)
	}
}

/// Runs the cache, refresh and grant protocol on top of an [`Authenticator`].
pub struct CredentialPlugin<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	authenticator: Authenticator<C, M>,
	cache: Arc<dyn TokenCache>,
	expiry_margin: Duration,
	metrics: Arc<CacheMetrics>,
	flow_guards: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> CredentialPlugin<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Pairs an authenticator with the cache its results are kept in.
	pub fn new(authenticator: Authenticator<C, M>, cache: Arc<dyn TokenCache>) -> Self {
		Self {
			authenticator,
			cache,
			expiry_margin: DEFAULT_EXPIRY_MARGIN,
			metrics: Default::default(),
			flow_guards: Default::default(),
		}
	}

	/// Overrides [`DEFAULT_EXPIRY_MARGIN`].
	pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
		self.expiry_margin = margin;

		self
	}

	/// Counters describing how calls were served.
	pub fn metrics(&self) -> &CacheMetrics {
		&self.metrics
	}

	/// Underlying authenticator.
	pub fn authenticator(&self) -> &Authenticator<C, M> {
		&self.authenticator
	}

	/// Returns a usable token set for `descriptor`, running the grant in `options` only when
	/// neither the cache nor a refresh can provide one.
	///
	/// The grant selection is checked before the cache is read, so a bad option set fails
	/// without any I/O.
	pub async fn get_token(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		options: &GrantOptionSet,
	) -> Result<PluginOutput> {
		const KIND: FlowKind = FlowKind::CredentialPlugin;

		let strategy = options.select()?;
		let key = CacheKey::for_descriptor(descriptor).map_err(ConfigError::from)?;
		let span = FlowSpan::new(KIND, "get_token");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let guard = self.flow_guard(&key);
				let _singleflight = guard.lock().await;

				self.serve(cancel, descriptor, strategy, &key).await
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}

	async fn serve(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		strategy: &dyn GrantStrategy,
		key: &CacheKey,
	) -> Result<PluginOutput> {
		let cached = self.cache.lookup(key).await?;
		let now = OffsetDateTime::now_utc();

		match &cached {
			Some(tokens) if tokens.is_usable_at(now, self.expiry_margin) => {
				self.metrics.record_hit();

				tracing::debug!(expires_at = %tokens.expires_at, "Using cached token.");

				return Ok(PluginOutput { tokens: tokens.clone(), source: TokenSource::Cache });
			},
			Some(tokens) => {
				tracing::debug!(expires_at = %tokens.expires_at, "Cached token expired.");
			},
			None => {
				self.metrics.record_miss();

				tracing::debug!("No cached token.");
			},
		}

		let provider =
			common::until_cancelled(cancel, self.authenticator.discover(descriptor)).await?;

		if let Some(tokens) =
			self.try_refresh(cancel, descriptor, &provider, cached.as_ref()).await?
		{
			self.cache.store(key, &tokens).await?;

			return Ok(PluginOutput { tokens, source: TokenSource::Refresh });
		}

		self.metrics.record_full_flow();

		let auth = self.authenticator.run_grant(cancel, descriptor, &provider, strategy).await?;

		self.cache.store(key, &auth.tokens).await?;

		Ok(PluginOutput { tokens: auth.tokens, source: TokenSource::Grant })
	}

	/// `Ok(None)` means the caller should fall back to the full grant.
	async fn try_refresh(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		provider: &DiscoveredProvider,
		cached: Option<&TokenSet>,
	) -> Result<Option<TokenSet>> {
		let Some((cached, refresh_token)) =
			cached.and_then(|tokens| tokens.refresh_token.as_ref().map(|rt| (tokens, rt)))
		else {
			return Ok(None);
		};

		self.metrics.record_refresh();

		let require_id_token = cached.id_token.is_some();

		match self
			.authenticator
			.refresh(cancel, descriptor, provider, refresh_token, require_id_token)
			.await
		{
			Ok(renewed) => {
				tracing::info!(expires_at = %renewed.tokens.expires_at, "Token refreshed.");

				Ok(Some(renewed.tokens))
			},
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(e) => {
				self.metrics.record_refresh_failure();

				tracing::warn!(error = %e, "Refresh failed, falling back to a full grant.");

				Ok(None)
			},
		}
	}

	/// Returns (and creates on demand) the singleflight guard for a cache key.
	fn flow_guard(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
#[cfg(feature = "reqwest")]
impl CredentialPlugin<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds a plugin with a reqwest transport configured from `input.tls` and a
	/// [`FileCache`] in `input.token_cache_dir`.
	pub fn from_input(input: &CredentialPluginInput) -> Result<Self> {
		let http_client = ReqwestHttpClient::from_tls_config(&input.tls)?;
		let cache = FileCache::new(&input.token_cache_dir);

		Ok(Self::new(Authenticator::new(http_client), Arc::new(cache)))
	}

	/// Runs one invocation end to end and wraps the result as an [`ExecCredential`].
	pub async fn run(
		cancel: &CancellationToken,
		input: &CredentialPluginInput,
	) -> Result<ExecCredential> {
		let plugin = Self::from_input(input)?;
		let output = plugin.get_token(cancel, &input.provider, &input.grant_options).await?;

		Ok(output.exec_credential())
	}
}
impl<C, M> Debug for CredentialPlugin<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialPlugin")
			.field("expiry_margin", &self.expiry_margin)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}
