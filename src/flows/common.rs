//! Pieces shared by every grant strategy: the execution context, the strategy capability, and
//! random value generation.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	interaction::Interaction,
	oauth::{GrantedTokens, OAuth2Facade},
	obs::FlowKind,
	provider::{DiscoveredProvider, ProviderDescriptor},
};

/// Boxed future returned by [`GrantStrategy::execute`].
pub type GrantFuture<'a> = Pin<Box<dyn Future<Output = Result<GrantOutcome>> + 'a + Send>>;

/// Everything a grant strategy may touch while it runs.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
	/// Provider/client pair being authenticated.
	pub descriptor: &'a ProviderDescriptor,
	/// Discovery output for the descriptor's issuer.
	pub provider: &'a DiscoveredProvider,
	/// Token endpoint operations.
	pub facade: &'a dyn OAuth2Facade,
	/// Browser and terminal access.
	pub interaction: &'a dyn Interaction,
	/// Cancellation signal of the enclosing call.
	pub cancel: &'a CancellationToken,
}
impl Debug for FlowContext<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FlowContext")
			.field("descriptor", self.descriptor)
			.field("cancelled", &self.cancel.is_cancelled())
			.finish()
	}
}

/// Tokens produced by one grant, plus the nonce the ID token must echo.
#[derive(Clone, Debug)]
pub struct GrantOutcome {
	/// Raw token endpoint response.
	pub tokens: GrantedTokens,
	/// Nonce sent in the authorization request, when the grant sends one.
	pub nonce: Option<String>,
}
impl GrantOutcome {
	/// Outcome of a grant that carries no nonce.
	pub fn without_nonce(tokens: GrantedTokens) -> Self {
		Self { tokens, nonce: None }
	}
}

/// One way of obtaining tokens from the provider.
pub trait GrantStrategy: Send + Sync {
	/// Label used for spans and metrics.
	fn kind(&self) -> FlowKind;

	/// Checks the options before any network or listener activity.
	fn validate(&self) -> Result<(), ConfigError> {
		Ok(())
	}

	/// Whether a response without an ID token is a validation failure.
	fn requires_id_token(&self) -> bool {
		true
	}

	/// Runs the grant to completion.
	fn execute<'a>(&'a self, ctx: &'a FlowContext<'a>) -> GrantFuture<'a>;
}

/// Alphanumeric string drawn from the thread-local CSPRNG.
pub(crate) fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

/// Resolves `fut` unless `cancel` fires first; an already cancelled token always wins.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Error::Cancelled),
		result = fut => result,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn random_strings_are_alphanumeric_and_distinct() {
		let first = random_string(32);
		let second = random_string(32);

		assert_eq!(first.len(), 32);
		assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(first, second);
	}

	#[tokio::test]
	async fn cancelled_token_wins_over_a_ready_future() {
		let cancel = CancellationToken::new();

		cancel.cancel();

		let result = until_cancelled(&cancel, async { Ok(1) }).await;

		assert!(matches!(result, Err(Error::Cancelled)));
		assert_eq!(
			until_cancelled(&CancellationToken::new(), async { Ok(2) })
				.await
				.expect("Live token should let the future finish."),
			2
		);
	}
}
