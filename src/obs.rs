//! Observability helpers for grant flows, the refresh path and the credential plugin.
//!
//! Every flow runs inside an `oidc_login.flow` span carrying `flow` (which grant) and `stage`
//! (call site) fields. With the `metrics` feature enabled, each attempt, success and failure also
//! increments the `oidc_login_flow_total` counter labeled by `flow` and `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization Code + PKCE through the local redirect listener.
	AuthCodeBrowser,
	/// Authorization Code + PKCE with a pasted code.
	AuthCodeManual,
	/// Device Authorization grant.
	DeviceCode,
	/// Resource Owner Password Credentials grant.
	Password,
	/// Client Credentials grant.
	ClientCredentials,
	/// Refresh token grant.
	Refresh,
	/// Cache-backed credential plugin call.
	CredentialPlugin,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AuthCodeBrowser => "authcode_browser",
			FlowKind::AuthCodeManual => "authcode_manual",
			FlowKind::DeviceCode => "device_code",
			FlowKind::Password => "password",
			FlowKind::ClientCredentials => "client_credentials",
			FlowKind::Refresh => "refresh",
			FlowKind::CredentialPlugin => "credential_plugin",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// The caller cancelled before the flow finished.
	Cancelled,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
			FlowOutcome::Cancelled => "cancelled",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
