//! Resource Owner Password Credentials grant.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	flows::common::{FlowContext, GrantFuture, GrantOutcome, GrantStrategy},
	interaction::Prompt,
	obs::FlowKind,
};

/// Options of the password grant. Missing values are prompted for.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RopcOption {
	/// Resource owner username.
	pub username: Option<String>,
	/// Resource owner password.
	pub password: Option<TokenSecret>,
}
impl RopcOption {
	/// Sets the username.
	pub fn with_username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into()).filter(|value: &String| !value.is_empty());

		self
	}

	/// Sets the password.
	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(TokenSecret::new(password)).filter(|value| !value.expose().is_empty());

		self
	}
}
impl Debug for RopcOption {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RopcOption")
			.field("username", &self.username)
			.field("password_set", &self.password.is_some())
			.finish()
	}
}
impl GrantStrategy for RopcOption {
	fn kind(&self) -> FlowKind {
		FlowKind::Password
	}

	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a> {
		Box::pin(async move {
			let username = match &self.username {
				Some(username) => username.clone(),
				None => ctx.interaction.prompt(Prompt::Username).await?,
			};
			let password = match &self.password {
				Some(password) => password.clone(),
				None => TokenSecret::new(ctx.interaction.prompt(Prompt::Password).await?),
			};
			let tokens = ctx.facade.exchange_password(&username, password.expose()).await?;

			Ok(GrantOutcome::without_nonce(tokens))
		})
	}
}
