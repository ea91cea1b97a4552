//! Normalized token set returned by every grant and stored by the token cache.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Errors produced by [`TokenSetBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenSetBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when `issued_at + expires_in` falls outside the representable date range.
	#[error("Expiry is out of the representable date range.")]
	ExpiryOutOfRange,
}

/// Tokens issued by the provider for one provider/client/scope combination.
///
/// The ID token is the credential handed to the cluster-access client. It is absent only for
/// client-credentials grants against providers that do not issue one, in which case
/// [`TokenSet::bearer`] falls back to the access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
	/// Signed ID token, verbatim as issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<TokenSecret>,
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<TokenSecret>,
	/// Instant the tokens were received.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Instant the bearer credential stops being valid.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
}
impl TokenSet {
	/// Returns a builder for constructing token sets.
	pub fn builder() -> TokenSetBuilder {
		TokenSetBuilder::default()
	}

	/// Credential to present to the cluster: the ID token, or the access token when the
	/// provider issued no ID token.
	pub fn bearer(&self) -> &TokenSecret {
		self.id_token.as_ref().unwrap_or(&self.access_token)
	}

	/// Returns `true` when the set stays valid beyond `now + margin`.
	pub fn is_usable_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		now.checked_add(margin).is_some_and(|limit| self.expires_at > limit)
	}

	/// Keeps `previous` as the refresh token when the provider did not rotate it.
	pub fn or_refresh_token(mut self, previous: Option<&TokenSecret>) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = previous.cloned();
		}

		self
	}
}
impl Debug for TokenSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSet")
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`TokenSet`].
#[derive(Clone, Debug, Default)]
pub struct TokenSetBuilder {
	id_token: Option<TokenSecret>,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenSetBuilder {
	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant, which wins over [`expires_in`](Self::expires_in).
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the ID token value.
	pub fn id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`TokenSet`].
	pub fn build(self) -> Result<TokenSet, TokenSetBuilderError> {
		let access_token = self.access_token.ok_or(TokenSetBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(TokenSetBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokenSetBuilderError::MissingExpiry),
		};

		Ok(TokenSet {
			id_token: self.id_token,
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
		})
	}
}
