//! RFC 8628 Device Authorization grant.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	error::ProviderError,
	flows::common::{FlowContext, GrantFuture, GrantOutcome, GrantStrategy},
	oauth::{DeviceAuthorization, DevicePoll, GrantedTokens, OAuth2Facade, SLOW_DOWN_INCREMENT},
	obs::FlowKind,
	provider::ProviderEndpoint,
};

/// Options of the device-code grant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCodeOption {
	/// Only display the verification URI instead of also opening it.
	pub skip_open_browser: bool,
	/// Browser command used instead of the system default.
	pub browser_command: Option<String>,
}
impl DeviceCodeOption {
	/// Only display the verification URI.
	pub fn skip_open_browser(mut self) -> Self {
		self.skip_open_browser = true;

		self
	}

	/// Uses `command` to open the browser.
	pub fn with_browser_command(mut self, command: impl Into<String>) -> Self {
		self.browser_command = Some(command.into());

		self
	}
}
impl GrantStrategy for DeviceCodeOption {
	fn kind(&self) -> FlowKind {
		FlowKind::DeviceCode
	}

	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a> {
		Box::pin(async move {
			let authorization = ctx.facade.request_device_authorization().await?;

			ctx.interaction.show_device_code(&authorization);

			if !self.skip_open_browser
				&& let Err(e) = ctx
					.interaction
					.open_browser(authorization.browser_uri(), self.browser_command.as_deref())
			{
				tracing::warn!(error = %e, "Failed to open the browser.");
			}

			let tokens = poll_until_granted(ctx.facade, &authorization).await?;

			Ok(GrantOutcome::without_nonce(tokens))
		})
	}
}

/// Polls the token endpoint until the user approves, the provider refuses, or the device code
/// lapses. `slow_down` permanently widens the interval.
pub(crate) async fn poll_until_granted(
	facade: &dyn OAuth2Facade,
	authorization: &DeviceAuthorization,
) -> Result<GrantedTokens> {
	// A lifetime past the clock's range never lapses.
	let deadline = Instant::now().checked_add(authorization.lifetime());
	let mut interval = authorization.poll_interval();

	loop {
		let wake_at = Instant::now().checked_add(interval).ok_or_else(|| {
			ProviderError::Unexpected {
				endpoint: ProviderEndpoint::DeviceAuthorization,
				message: format!("polling interval of {}s is out of range", interval.as_secs()),
				status: None,
				retry_after: None,
			}
		})?;

		if deadline.is_some_and(|deadline| wake_at > deadline) {
			return Err(ProviderError::DeviceCodeExpired.into());
		}

		tokio::time::sleep_until(wake_at).await;

		match facade.poll_device_token(authorization.device_code.expose()).await? {
			DevicePoll::Granted(tokens) => return Ok(tokens),
			DevicePoll::Pending => tracing::debug!("Device authorization pending."),
			DevicePoll::SlowDown => {
				interval = interval.saturating_add(SLOW_DOWN_INCREMENT);

				tracing::debug!(interval_secs = interval.as_secs(), "Device polling slowed down.");
			},
		}
	}
}
