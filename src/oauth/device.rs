//! RFC 8628 device authorization responses and token polling outcomes.

// crates.io
use oauth2::HttpResponse;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::ProviderError,
	oauth::{self, GrantedTokens},
	provider::{
		GrantType, ProviderEndpoint, ProviderErrorContext, ProviderErrorKind, ProviderStrategy,
	},
};

/// Polling interval used when the provider does not specify one.
pub const DEFAULT_DEVICE_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);
/// Amount added to the interval after each `slow_down` response.
pub const SLOW_DOWN_INCREMENT: StdDuration = StdDuration::from_secs(5);

/// Device authorization response (RFC 8628 §3.2).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
	/// Code the client polls with.
	pub device_code: TokenSecret,
	/// Code the user types at the verification URI.
	pub user_code: String,
	/// Page where the user enters the code. Some providers call it `verification_url`.
	#[serde(alias = "verification_url")]
	pub verification_uri: String,
	/// Verification URI with the user code embedded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub verification_uri_complete: Option<String>,
	/// Lifetime of the device code in seconds.
	pub expires_in: u64,
	/// Minimum polling interval in seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub interval: Option<u64>,
}
impl DeviceAuthorization {
	/// URI to open in a browser, preferring the one with the code embedded.
	pub fn browser_uri(&self) -> &str {
		self.verification_uri_complete.as_deref().unwrap_or(&self.verification_uri)
	}

	/// Polling interval, falling back to [`DEFAULT_DEVICE_POLL_INTERVAL`].
	pub fn poll_interval(&self) -> StdDuration {
		self.interval
			.filter(|secs| *secs > 0)
			.map(StdDuration::from_secs)
			.unwrap_or(DEFAULT_DEVICE_POLL_INTERVAL)
	}

	/// Lifetime of the device code.
	pub fn lifetime(&self) -> StdDuration {
		StdDuration::from_secs(self.expires_in)
	}
}
impl Debug for DeviceAuthorization {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeviceAuthorization")
			.field("user_code", &self.user_code)
			.field("verification_uri", &self.verification_uri)
			.field("expires_in", &self.expires_in)
			.field("interval", &self.interval)
			.finish()
	}
}

/// Result of one device token poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DevicePoll {
	/// The user approved; tokens were issued.
	Granted(GrantedTokens),
	/// `authorization_pending`: poll again after the interval.
	Pending,
	/// `slow_down`: poll again after a longer interval.
	SlowDown,
}

#[derive(Deserialize)]
struct RawTokenResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct RawErrorResponse {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

pub(crate) fn parse_authorization(
	strategy: &dyn ProviderStrategy,
	response: &HttpResponse,
) -> Result<DeviceAuthorization> {
	const ENDPOINT: ProviderEndpoint = ProviderEndpoint::DeviceAuthorization;

	if response.status().is_success() {
		return oauth::parse_json(ENDPOINT, response);
	}

	let (kind, body) = classify_error(strategy, ENDPOINT, response)?;

	Err(oauth_error(ENDPOINT, kind, body, response))
}

pub(crate) fn parse_poll(
	strategy: &dyn ProviderStrategy,
	response: &HttpResponse,
) -> Result<DevicePoll> {
	const ENDPOINT: ProviderEndpoint = ProviderEndpoint::Token;

	if response.status().is_success() {
		let raw: RawTokenResponse = oauth::parse_json(ENDPOINT, response)?;

		return Ok(DevicePoll::Granted(GrantedTokens {
			access_token: TokenSecret::new(raw.access_token),
			refresh_token: raw.refresh_token.map(TokenSecret::from),
			id_token: raw.id_token.map(TokenSecret::from),
			expires_in: raw.expires_in.map(StdDuration::from_secs),
			issued_at: OffsetDateTime::now_utc(),
		}));
	}

	let (kind, body) = classify_error(strategy, ENDPOINT, response)?;

	match kind {
		ProviderErrorKind::AuthorizationPending => Ok(DevicePoll::Pending),
		ProviderErrorKind::SlowDown => Ok(DevicePoll::SlowDown),
		ProviderErrorKind::ExpiredToken => Err(ProviderError::DeviceCodeExpired.into()),
		_ => Err(oauth_error(ENDPOINT, kind, body, response)),
	}
}

fn classify_error(
	strategy: &dyn ProviderStrategy,
	endpoint: ProviderEndpoint,
	response: &HttpResponse,
) -> Result<(ProviderErrorKind, RawErrorResponse)> {
	let status = response.status().as_u16();
	let body = serde_json::from_slice::<RawErrorResponse>(response.body()).map_err(|_| {
		ProviderError::Unexpected {
			endpoint,
			message: format!("HTTP {status}: {}", oauth::body_preview(response.body())),
			status: Some(status),
			retry_after: None,
		}
	})?;
	let mut ctx = ProviderErrorContext::new(GrantType::DeviceCode)
		.with_http_status(status)
		.with_oauth_error(body.error.clone());

	if let Some(description) = &body.error_description {
		ctx = ctx.with_error_description(description.clone());
	}

	Ok((strategy.classify_token_error(&ctx), body))
}

fn oauth_error(
	endpoint: ProviderEndpoint,
	kind: ProviderErrorKind,
	body: RawErrorResponse,
	response: &HttpResponse,
) -> Error {
	ProviderError::OAuth {
		endpoint,
		kind,
		error: body.error,
		description: body.error_description,
		status: Some(response.status().as_u16()),
	}
	.into()
}
