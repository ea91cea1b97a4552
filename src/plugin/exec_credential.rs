//! Exec credential object understood by cluster-access clients.

// self
use crate::{_prelude::*, auth::TokenSet};

/// Kind carried by every exec credential.
pub const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";
/// API version emitted unless the caller asks for another one.
pub const DEFAULT_EXEC_CREDENTIAL_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// Credential object printed for the cluster-access client to read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredential {
	/// Always [`EXEC_CREDENTIAL_KIND`].
	pub kind: String,
	/// Client authentication API version.
	pub api_version: String,
	/// Credential payload.
	pub status: ExecCredentialStatus,
}
impl ExecCredential {
	/// Wraps the bearer credential of `tokens`.
	pub fn from_tokens(tokens: &TokenSet) -> Self {
		Self {
			kind: EXEC_CREDENTIAL_KIND.into(),
			api_version: DEFAULT_EXEC_CREDENTIAL_API_VERSION.into(),
			status: ExecCredentialStatus {
				token: tokens.bearer().expose().to_owned(),
				expiration_timestamp: tokens.expires_at,
			},
		}
	}

	/// Overrides the API version, e.g. for clients that only speak `v1`.
	pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
		self.api_version = api_version.into();

		self
	}
}

/// Status block of an [`ExecCredential`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
	/// Bearer token presented to the cluster.
	pub token: String,
	/// Instant the cluster-access client should ask again.
	#[serde(with = "time::serde::rfc3339")]
	pub expiration_timestamp: OffsetDateTime,
}
impl Debug for ExecCredentialStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExecCredentialStatus")
			.field("token", &"<redacted>")
			.field("expiration_timestamp", &self.expiration_timestamp)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn tokens(id_token: Option<&str>) -> TokenSet {
		let mut builder = TokenSet::builder()
			.access_token("access")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC));

		if let Some(id_token) = id_token {
			builder = builder.id_token(id_token);
		}

		builder.build().expect("Token set fixture should build.")
	}

	#[test]
	fn serializes_client_go_shape() {
		let credential = ExecCredential::from_tokens(&tokens(Some("id.token.value")));
		let json = serde_json::to_value(&credential).expect("Credential should serialize.");

		assert_eq!(
			json,
			serde_json::json!({
				"kind": "ExecCredential",
				"apiVersion": "client.authentication.k8s.io/v1beta1",
				"status": {
					"token": "id.token.value",
					"expirationTimestamp": "2025-01-01T01:00:00Z",
				},
			})
		);
	}

	#[test]
	fn falls_back_to_access_token_and_redacts_debug() {
		let credential = ExecCredential::from_tokens(&tokens(None))
			.with_api_version("client.authentication.k8s.io/v1");

		assert_eq!(credential.status.token, "access");
		assert_eq!(credential.api_version, "client.authentication.k8s.io/v1");
		assert!(!format!("{credential:?}").contains("access"));
	}
}
