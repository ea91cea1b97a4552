//! The grant option set: one slot per grant, exactly one of which may be filled.

// self
use crate::{
	error::ConfigError,
	flows::{
		AuthCodeBrowserOption, AuthCodeManualOption, ClientCredentialsOption, DeviceCodeOption,
		RopcOption, common::GrantStrategy,
	},
};

/// Caller-selected grant and its parameters.
///
/// Build it with one of the constructors; setting more than one field by hand is rejected by
/// [`GrantOptionSet::select`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantOptionSet {
	/// Authorization Code grant through a local redirect listener.
	pub auth_code_browser: Option<AuthCodeBrowserOption>,
	/// Authorization Code grant with a pasted code.
	pub auth_code_manual: Option<AuthCodeManualOption>,
	/// Device Authorization grant.
	pub device_code: Option<DeviceCodeOption>,
	/// Resource Owner Password Credentials grant.
	pub ropc: Option<RopcOption>,
	/// Client Credentials grant.
	pub client_credentials: Option<ClientCredentialsOption>,
}
impl GrantOptionSet {
	/// Selects the browser flow.
	pub fn auth_code_browser(option: AuthCodeBrowserOption) -> Self {
		Self { auth_code_browser: Some(option), ..Default::default() }
	}

	/// Selects the manual flow.
	pub fn auth_code_manual(option: AuthCodeManualOption) -> Self {
		Self { auth_code_manual: Some(option), ..Default::default() }
	}

	/// Selects the device-code flow.
	pub fn device_code(option: DeviceCodeOption) -> Self {
		Self { device_code: Some(option), ..Default::default() }
	}

	/// Selects the password flow.
	pub fn ropc(option: RopcOption) -> Self {
		Self { ropc: Some(option), ..Default::default() }
	}

	/// Selects the client-credentials flow.
	pub fn client_credentials(option: ClientCredentialsOption) -> Self {
		Self { client_credentials: Some(option), ..Default::default() }
	}

	/// Returns the single populated grant after checking its options.
	pub fn select(&self) -> Result<&dyn GrantStrategy, ConfigError> {
		let populated = self.populated();

		match populated.as_slice() {
			[] => Err(ConfigError::NoGrantSelected),
			[(_, strategy)] => {
				strategy.validate()?;

				Ok(*strategy)
			},
			many => Err(ConfigError::AmbiguousGrant {
				selected: many.iter().map(|(label, _)| *label).collect(),
			}),
		}
	}

	fn populated(&self) -> Vec<(&'static str, &dyn GrantStrategy)> {
		let slots: [(&'static str, Option<&dyn GrantStrategy>); 5] = [
			("authcode-browser", self.auth_code_browser.as_ref().map(|o| o as &dyn GrantStrategy)),
			("authcode-manual", self.auth_code_manual.as_ref().map(|o| o as &dyn GrantStrategy)),
			("device-code", self.device_code.as_ref().map(|o| o as &dyn GrantStrategy)),
			("ropc", self.ropc.as_ref().map(|o| o as &dyn GrantStrategy)),
			(
				"client-credentials",
				self.client_credentials.as_ref().map(|o| o as &dyn GrantStrategy),
			),
		];

		slots
			.into_iter()
			.filter_map(|(label, slot)| slot.map(|strategy| (label, strategy)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::obs::FlowKind;

	#[test]
	fn single_variant_dispatches_to_itself() {
		let cases = [
			(GrantOptionSet::auth_code_browser(Default::default()), FlowKind::AuthCodeBrowser),
			(GrantOptionSet::auth_code_manual(Default::default()), FlowKind::AuthCodeManual),
			(GrantOptionSet::device_code(Default::default()), FlowKind::DeviceCode),
			(GrantOptionSet::ropc(Default::default()), FlowKind::Password),
			(GrantOptionSet::client_credentials(Default::default()), FlowKind::ClientCredentials),
		];

		for (options, kind) in cases {
			let strategy = options.select().expect("Exactly one variant should be selectable.");

			assert_eq!(strategy.kind(), kind);
		}
	}

	#[test]
	fn zero_or_many_variants_are_rejected() {
		assert!(matches!(GrantOptionSet::default().select(), Err(ConfigError::NoGrantSelected)));

		let mut options = GrantOptionSet::device_code(Default::default());

		options.ropc = Some(Default::default());
		options.client_credentials = Some(Default::default());

		let Err(ConfigError::AmbiguousGrant { selected }) = options.select() else {
			panic!("Three variants must be ambiguous.");
		};

		assert_eq!(selected, vec!["device-code", "ropc", "client-credentials"]);
	}

	#[test]
	fn selected_variant_is_validated() {
		let options = GrantOptionSet::auth_code_browser(
			AuthCodeBrowserOption::default().with_bind_addresses(Vec::<String>::new()),
		);

		assert!(matches!(options.select(), Err(ConfigError::MissingBindAddress)));
	}
}
