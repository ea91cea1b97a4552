//! Provider strategy hooks that customize token exchanges.
//!
//! Implementations decorate outgoing token requests and classify error bodies without tying
//! flows to any particular HTTP client.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Strategy hook that allows providers to decorate requests and classify errors.
///
/// The hooks use crate-owned data types so implementors never depend on transport-specific
/// structures. Only [`classify_token_error`](Self::classify_token_error) is mandatory.
pub trait ProviderStrategy: Send + Sync {
	/// Maps an error response from the token or device endpoint into a [`ProviderErrorKind`].
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;

	/// Adds provider-specific form parameters before a token request is dispatched.
	///
	/// The default implementation does nothing.
	fn augment_token_request(&self, _grant: GrantType, _form: &mut BTreeMap<String, String>) {}
}

/// Canonical provider error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// Provider rejected the grant (bad code, refresh token or password).
	InvalidGrant,
	/// Client authentication failed.
	InvalidClient,
	/// Requested scopes are not allowed.
	InsufficientScope,
	/// The resource owner denied the request.
	AccessDenied,
	/// Device flow: the user has not approved yet.
	AuthorizationPending,
	/// Device flow: poll less often.
	SlowDown,
	/// Device flow: the device code lapsed.
	ExpiredToken,
	/// Failure is temporary on the provider side.
	Transient,
}

/// Context passed to provider strategies when classifying token errors.
///
/// Only primitive data is kept (status code, OAuth fields, body preview) so strategies stay
/// decoupled from the HTTP client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self {
			grant_type,
			http_status: None,
			oauth_error: None,
			error_description: None,
			body_preview: None,
		}
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Default strategy that applies RFC 6749 and RFC 8628 error codes.
///
/// Structured OAuth fields win, then body text hints, then the HTTP status code.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(match_exact_value) {
			return kind;
		}
		if let Some(kind) = classify_body(ctx.error_description.as_deref()) {
			return kind;
		}
		if let Some(kind) = classify_body(ctx.body_preview.as_deref()) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn match_exact_value(value: &str) -> Option<ProviderErrorKind> {
	let kind = match value.to_ascii_lowercase().as_str() {
		"invalid_grant" | "invalid_request" => ProviderErrorKind::InvalidGrant,
		"invalid_client" | "unauthorized_client" => ProviderErrorKind::InvalidClient,
		"invalid_scope" | "insufficient_scope" => ProviderErrorKind::InsufficientScope,
		"access_denied" => ProviderErrorKind::AccessDenied,
		"authorization_pending" => ProviderErrorKind::AuthorizationPending,
		"slow_down" => ProviderErrorKind::SlowDown,
		"expired_token" => ProviderErrorKind::ExpiredToken,
		"temporarily_unavailable" | "server_error" => ProviderErrorKind::Transient,
		_ => return None,
	};

	Some(kind)
}

fn classify_body(body: Option<&str>) -> Option<ProviderErrorKind> {
	let lowered = body?.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("authorization_pending") =>
			Some(ProviderErrorKind::AuthorizationPending),
		text if text.contains("slow_down") => Some(ProviderErrorKind::SlowDown),
		text if text.contains("expired_token") => Some(ProviderErrorKind::ExpiredToken),
		text if text.contains("access_denied") => Some(ProviderErrorKind::AccessDenied),
		text if text.contains("invalid_grant") => Some(ProviderErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(ProviderErrorKind::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(ProviderErrorKind::InsufficientScope),
		text if text.contains("temporarily_unavailable") => Some(ProviderErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::AccessDenied,
		_ => ProviderErrorKind::Transient,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn classify(ctx: ProviderErrorContext) -> ProviderErrorKind {
		DefaultProviderStrategy.classify_token_error(&ctx)
	}

	#[test]
	fn device_flow_codes_are_recognized() {
		let ctx = ProviderErrorContext::new(GrantType::DeviceCode).with_http_status(400);

		assert_eq!(
			classify(ctx.clone().with_oauth_error("authorization_pending")),
			ProviderErrorKind::AuthorizationPending
		);
		assert_eq!(
			classify(ctx.clone().with_oauth_error("slow_down")),
			ProviderErrorKind::SlowDown
		);
		assert_eq!(
			classify(ctx.clone().with_oauth_error("expired_token")),
			ProviderErrorKind::ExpiredToken
		);
		assert_eq!(
			classify(ctx.with_oauth_error("access_denied")),
			ProviderErrorKind::AccessDenied
		);
	}

	#[test]
	fn falls_back_to_body_then_status() {
		let by_body = ProviderErrorContext::new(GrantType::RefreshToken)
			.with_http_status(500)
			.with_body_preview("<html>invalid_grant: token revoked</html>");
		let by_status = ProviderErrorContext::new(GrantType::Password).with_http_status(401);

		assert_eq!(classify(by_body), ProviderErrorKind::InvalidGrant);
		assert_eq!(classify(by_status), ProviderErrorKind::InvalidClient);
		assert_eq!(
			classify(ProviderErrorContext::new(GrantType::Password).with_http_status(503)),
			ProviderErrorKind::Transient
		);
	}

	#[test]
	fn body_preview_is_truncated() {
		let ctx = ProviderErrorContext::new(GrantType::AuthorizationCode)
			.with_body_preview("x".repeat(1_000));
		let preview = ctx.body_preview.expect("Body preview should be stored.");

		assert_eq!(preview.chars().count(), ProviderErrorContext::BODY_PREVIEW_LIMIT + 1);
		assert!(preview.ends_with('…'));
	}
}
