// self
use crate::_prelude::*;

/// OAuth 2.0 grant types that reach the token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization Code grant, always with PKCE.
	AuthorizationCode,
	/// Refresh Token grant used to renew a cached token set.
	RefreshToken,
	/// Resource Owner Password Credentials grant.
	Password,
	/// Client Credentials grant for app-only tokens.
	ClientCredentials,
	/// Device Authorization grant (RFC 8628).
	DeviceCode,
}
impl GrantType {
	/// Returns the `grant_type` form value for the grant.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
			GrantType::Password => "password",
			GrantType::ClientCredentials => "client_credentials",
			GrantType::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
