//! Authorization Code + PKCE grants.
//!
//! The browser variant starts a [`LocalServer`], opens the authorization URL and waits for the
//! provider to redirect back; the manual variant prints the URL and reads the code the user
//! pastes. Both send `state`, `nonce` and an S256 PKCE challenge, and both redeem the code with
//! the matching verifier.

/// Per-attempt `state`, nonce and PKCE material plus the authorization URL built from them.
pub mod session;

pub use session::*;

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	flows::common::{FlowContext, GrantFuture, GrantOutcome, GrantStrategy},
	interaction::Prompt,
	listener::{
		DEFAULT_BIND_ADDRESSES, DEFAULT_REDIRECT_HOSTNAME, LocalServer, LocalServerConfig,
		LocalTlsConfig,
	},
	obs::FlowKind,
};

/// How long the browser flow waits for the redirect by default.
pub const DEFAULT_AUTHENTICATION_TIMEOUT: StdDuration = StdDuration::from_secs(180);
/// Out-of-band redirect URI used by the manual flow by default.
pub const DEFAULT_MANUAL_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Options of the browser-based Authorization Code grant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthCodeBrowserOption {
	/// Candidate listener addresses; the first that binds is used.
	pub bind_addresses: Vec<String>,
	/// How long to wait for the redirect.
	pub authentication_timeout: StdDuration,
	/// Hostname placed in the redirect URI.
	pub redirect_hostname: String,
	/// Serve the redirect over HTTPS with this certificate/key pair.
	pub local_server_tls: Option<LocalTlsConfig>,
	/// Extra query parameters for the authorization request.
	pub authentication_extra_params: BTreeMap<String, String>,
	/// Print the URL instead of opening a browser.
	pub skip_open_browser: bool,
	/// Browser command used instead of the system default.
	pub browser_command: Option<String>,
	/// Page the browser is sent to after a successful redirect.
	pub local_server_success_redirect: Option<Url>,
}
impl AuthCodeBrowserOption {
	/// Replaces the candidate bind addresses.
	pub fn with_bind_addresses<I, S>(mut self, addresses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.bind_addresses = addresses.into_iter().map(Into::into).collect();

		self
	}

	/// Overrides the authentication timeout.
	pub fn with_authentication_timeout(mut self, timeout: StdDuration) -> Self {
		self.authentication_timeout = timeout;

		self
	}

	/// Overrides the redirect hostname.
	pub fn with_redirect_hostname(mut self, hostname: impl Into<String>) -> Self {
		self.redirect_hostname = hostname.into();

		self
	}

	/// Serves the redirect over HTTPS.
	pub fn with_local_server_tls(mut self, tls: LocalTlsConfig) -> Self {
		self.local_server_tls = Some(tls);

		self
	}

	/// Adds an extra authorization request parameter.
	pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.authentication_extra_params.insert(key.into(), value.into());

		self
	}

	/// Prints the URL instead of opening a browser.
	pub fn skip_open_browser(mut self) -> Self {
		self.skip_open_browser = true;

		self
	}

	/// Uses `command` to open the browser.
	pub fn with_browser_command(mut self, command: impl Into<String>) -> Self {
		self.browser_command = Some(command.into());

		self
	}

	/// Redirects the browser to `url` after success.
	pub fn with_success_redirect(mut self, url: Url) -> Self {
		self.local_server_success_redirect = Some(url);

		self
	}

	fn local_server_config(&self) -> LocalServerConfig {
		LocalServerConfig {
			bind_addresses: self.bind_addresses.clone(),
			redirect_hostname: self.redirect_hostname.clone(),
			tls: self.local_server_tls.clone(),
			success_redirect_url: self.local_server_success_redirect.clone(),
		}
	}
}
impl Default for AuthCodeBrowserOption {
	fn default() -> Self {
		Self {
			bind_addresses: DEFAULT_BIND_ADDRESSES.iter().map(|addr| (*addr).to_owned()).collect(),
			authentication_timeout: DEFAULT_AUTHENTICATION_TIMEOUT,
			redirect_hostname: DEFAULT_REDIRECT_HOSTNAME.into(),
			local_server_tls: None,
			authentication_extra_params: BTreeMap::new(),
			skip_open_browser: false,
			browser_command: None,
			local_server_success_redirect: None,
		}
	}
}
impl GrantStrategy for AuthCodeBrowserOption {
	fn kind(&self) -> FlowKind {
		FlowKind::AuthCodeBrowser
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.bind_addresses.iter().all(|addr| addr.trim().is_empty()) {
			return Err(ConfigError::MissingBindAddress);
		}

		Ok(())
	}

	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a> {
		Box::pin(async move {
			let server = LocalServer::bind(&self.local_server_config()).await?;
			let redirect_uri = server.redirect_uri().clone();
			let session = new_session(ctx, redirect_uri, &self.authentication_extra_params)?;
			let url = session.authorize_url.as_str();

			if self.skip_open_browser {
				ctx.interaction.show_authorization_url(url);
			} else if let Err(e) =
				ctx.interaction.open_browser(url, self.browser_command.as_deref())
			{
				tracing::warn!(error = %e, "Failed to open the browser.");

				ctx.interaction.show_authorization_url(url);
			}

			let code =
				server.receive(&session.state, self.authentication_timeout, ctx.cancel).await?;
			let tokens = ctx
				.facade
				.exchange_authorization_code(
					&code,
					session.pkce_verifier(),
					session.redirect_uri.as_str(),
				)
				.await?;

			Ok(GrantOutcome { tokens, nonce: Some(session.nonce) })
		})
	}
}

/// Options of the Authorization Code grant with a pasted code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthCodeManualOption {
	/// Redirect URI registered for out-of-band delivery.
	pub redirect_uri: String,
	/// Extra query parameters for the authorization request.
	pub authentication_extra_params: BTreeMap<String, String>,
}
impl AuthCodeManualOption {
	/// Overrides the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
		self.redirect_uri = redirect_uri.into();

		self
	}

	/// Adds an extra authorization request parameter.
	pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.authentication_extra_params.insert(key.into(), value.into());

		self
	}

	fn parsed_redirect_uri(&self) -> Result<Url, ConfigError> {
		Url::parse(&self.redirect_uri).map_err(|source| ConfigError::InvalidRedirect { source })
	}
}
impl Default for AuthCodeManualOption {
	fn default() -> Self {
		Self {
			redirect_uri: DEFAULT_MANUAL_REDIRECT_URI.into(),
			authentication_extra_params: BTreeMap::new(),
		}
	}
}
impl GrantStrategy for AuthCodeManualOption {
	fn kind(&self) -> FlowKind {
		FlowKind::AuthCodeManual
	}

	fn validate(&self) -> Result<(), ConfigError> {
		self.parsed_redirect_uri().map(|_| ())
	}

	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a> {
		Box::pin(async move {
			let session =
				new_session(ctx, self.parsed_redirect_uri()?, &self.authentication_extra_params)?;

			ctx.interaction.show_authorization_url(session.authorize_url.as_str());

			let code = ctx.interaction.prompt(Prompt::AuthorizationCode).await?;
			let tokens = ctx
				.facade
				.exchange_authorization_code(
					code.trim(),
					session.pkce_verifier(),
					session.redirect_uri.as_str(),
				)
				.await?;

			Ok(GrantOutcome { tokens, nonce: Some(session.nonce) })
		})
	}
}

fn new_session(
	ctx: &FlowContext<'_>,
	redirect_uri: Url,
	extra_params: &BTreeMap<String, String>,
) -> Result<AuthorizationSession> {
	let scopes = ctx.descriptor.requested_scopes().map_err(ConfigError::from)?;

	Ok(AuthorizationSession::new(
		&ctx.provider.metadata.authorization_endpoint,
		&ctx.descriptor.client_id,
		&scopes,
		redirect_uri,
		extra_params,
	))
}
