//! Refresh Token grant used to renew an expired cached token set.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	flows::{AuthResult, Authenticator, common},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{DiscoveredProvider, ProviderDescriptor},
};

impl<C, M> Authenticator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Redeems `refresh_token` once and validates the renewed ID token.
	///
	/// The nonce check is skipped because refresh responses do not echo one. When
	/// `require_id_token` is set, a response without an ID token is rejected. A response that
	/// does not rotate the refresh token keeps `refresh_token`.
	pub async fn refresh(
		&self,
		cancel: &CancellationToken,
		descriptor: &ProviderDescriptor,
		provider: &DiscoveredProvider,
		refresh_token: &TokenSecret,
		require_id_token: bool,
	) -> Result<AuthResult> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let facade = self.facade(descriptor, provider)?;
				let tokens =
					common::until_cancelled(cancel, facade.refresh_token(refresh_token.expose()))
						.await?;
				let mut renewed =
					super::validated(descriptor, provider, tokens, None, require_id_token)?;

				renewed.tokens = renewed.tokens.or_refresh_token(Some(refresh_token));

				Ok(renewed)
			})
			.await;

		obs::record_flow_result(KIND, &result);

		result
	}
}
