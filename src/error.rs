//! Crate-level error types shared by the engine, the listener, the validator, and the cache.

// self
use crate::{
	_prelude::*,
	provider::{ProviderEndpoint, ProviderErrorKind},
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// Each variant is one class of failure a caller can react to differently: configuration
/// errors are never worth retrying, timeouts and cancellations may warrant re-prompting the
/// user, and provider errors carry whatever detail the provider supplied.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Invalid or ambiguous local configuration.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Network failure or error response from the identity provider.
	#[error(transparent)]
	Provider(#[from] ProviderError),
	/// The provider issued an ID token that failed validation.
	#[error(transparent)]
	TokenValidation(#[from] crate::validate::TokenValidationError),
	/// The redirect carried a `state` value different from the one this flow generated.
	#[error("Authorization response failed the anti-forgery state check.")]
	Csrf,
	/// The local redirect listener could not be started.
	#[error(transparent)]
	Listener(#[from] crate::listener::ListenerError),
	/// The user did not complete the authorization in time.
	#[error("Authentication timed out after {}s.", .after.as_secs())]
	Timeout {
		/// Configured authentication timeout.
		after: StdDuration,
	},
	/// The caller cancelled the execution context.
	#[error("Authentication was cancelled.")]
	Cancelled,
	/// Reading user input or opening the browser failed.
	#[error("Terminal interaction failed.")]
	Interaction(#[source] std::io::Error),
	/// Token cache failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
}
impl From<TransportError> for Error {
	fn from(e: TransportError) -> Self {
		Self::Provider(e.into())
	}
}

/// Configuration and validation failures detected before or while talking to the provider.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor is incomplete or unsafe.
	#[error(transparent)]
	InvalidDescriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Discovery returned an endpoint URL that cannot be used.
	#[error("The {endpoint} endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Which endpoint failed to parse.
		endpoint: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// No grant variant is set in the option set.
	#[error("No grant type is selected.")]
	NoGrantSelected,
	/// More than one grant variant is set in the option set.
	#[error("Exactly one grant type must be selected, got {}.", .selected.join(", "))]
	AmbiguousGrant {
		/// Labels of every populated variant.
		selected: Vec<&'static str>,
	},
	/// The browser flow was configured without any bind address.
	#[error("At least one bind address is required for the browser flow.")]
	MissingBindAddress,
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token set builder validation failed.
	#[error("Unable to build token set.")]
	TokenBuild(#[from] crate::auth::TokenSetBuilderError),
	/// The device-code grant was selected but discovery exposes no device endpoint.
	#[error("Provider does not advertise a device authorization endpoint.")]
	DeviceAuthorizationUnsupported,
	/// A CA certificate for outbound TLS could not be loaded.
	#[error("Failed to load CA certificate from {}.", .path.display())]
	CaCertificate {
		/// Certificate source path, or `<inline>` for PEM data.
		path: PathBuf,
		/// Underlying read or parse failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures reported by, or while reaching, the identity provider.
#[derive(Debug, ThisError)]
pub enum ProviderError {
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// The provider answered with an OAuth error body.
	#[error(
		"The {endpoint} endpoint returned `{error}`{}.",
		.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
	)]
	OAuth {
		/// Endpoint that produced the error.
		endpoint: ProviderEndpoint,
		/// Classification assigned by the provider strategy.
		kind: ProviderErrorKind,
		/// Provider-supplied OAuth `error` code.
		error: String,
		/// Provider-supplied OAuth `error_description`.
		description: Option<String>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The authorization redirect carried an `error` parameter instead of a code.
	#[error(
		"Authorization was denied: `{error}`{}.",
		.description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
	)]
	AuthorizationDenied {
		/// Provider-supplied OAuth `error` code.
		error: String,
		/// Provider-supplied OAuth `error_description`.
		description: Option<String>,
	},
	/// The provider responded with JSON that does not match the expected shape.
	#[error("The {endpoint} endpoint returned malformed JSON.")]
	ResponseParse {
		/// Endpoint that produced the payload.
		endpoint: ProviderEndpoint,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The provider returned something that is neither a result nor an OAuth error.
	#[error("The {endpoint} endpoint returned an unexpected response: {message}.")]
	Unexpected {
		/// Endpoint that produced the response.
		endpoint: ProviderEndpoint,
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Discovery metadata names a different issuer than the one configured.
	#[error("Discovery issuer `{actual}` does not match the configured issuer `{expected}`.")]
	IssuerMismatch {
		/// Configured issuer URL.
		expected: String,
		/// Issuer advertised by the discovery document.
		actual: String,
	},
	/// The device code lapsed before the user approved the request.
	#[error("The device code expired before authorization completed.")]
	DeviceCodeExpired,
}
impl ProviderError {
	/// HTTP status attached to the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::OAuth { status, .. }
			| Self::ResponseParse { status, .. }
			| Self::Unexpected { status, .. } => *status,
			_ => None,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the identity provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the identity provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
