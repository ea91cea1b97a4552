//! Client Credentials grant. No user is involved, so the provider may omit the ID token.

// self
use crate::{
	_prelude::*,
	flows::common::{FlowContext, GrantFuture, GrantOutcome, GrantStrategy},
	obs::FlowKind,
};

/// Options of the client-credentials grant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientCredentialsOption {
	/// Extra form parameters for the token request, e.g. `audience` or `resource`.
	pub token_request_extra_params: BTreeMap<String, String>,
}
impl ClientCredentialsOption {
	/// Adds an extra token request parameter.
	pub fn with_extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.token_request_extra_params.insert(key.into(), value.into());

		self
	}
}
impl GrantStrategy for ClientCredentialsOption {
	fn kind(&self) -> FlowKind {
		FlowKind::ClientCredentials
	}

	fn requires_id_token(&self) -> bool {
		false
	}

	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a> {
		Box::pin(async move {
			let tokens =
				ctx.facade.exchange_client_credentials(&self.token_request_extra_params).await?;

			Ok(GrantOutcome::without_nonce(tokens))
		})
	}
}
