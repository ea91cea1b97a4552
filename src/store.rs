//! Token cache contract, cache keys and the built-in backends.

pub mod file;
pub mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ScopeValidationError, TokenSet},
	provider::ProviderDescriptor,
};

/// Boxed future returned by [`TokenCache`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Keyed storage for token sets.
///
/// Expiry is not the cache's concern: [`lookup`](TokenCache::lookup) returns whatever was
/// stored and the caller decides whether it is still usable.
pub trait TokenCache
where
	Self: Send + Sync,
{
	/// Returns the entry stored under `key`, if any.
	fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<TokenSet>>;

	/// Replaces the entry under `key` as a whole.
	fn store<'a>(&'a self, key: &'a CacheKey, tokens: &'a TokenSet) -> StoreFuture<'a, ()>;

	/// Removes the entry under `key`; a missing entry is not an error.
	fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`TokenCache`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The entry could not be encoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The storage medium failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Identity of one cache entry: the issuer, the client and the requested scopes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
	/// Issuer URL exactly as configured.
	pub issuer: String,
	/// OAuth 2.0 client identifier.
	pub client_id: String,
	/// Requested scopes, sorted.
	pub scopes: ScopeSet,
}
impl CacheKey {
	/// Builds the key a descriptor's tokens are cached under.
	pub fn for_descriptor(descriptor: &ProviderDescriptor) -> Result<Self, ScopeValidationError> {
		Ok(Self {
			issuer: descriptor.issuer.clone(),
			client_id: descriptor.client_id.clone(),
			scopes: descriptor.requested_scopes()?,
		})
	}

	/// Stable, filename-safe digest of the key.
	///
	/// Scope order never changes the value because [`ScopeSet`] is kept sorted.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();

		for part in [self.issuer.as_str(), self.client_id.as_str()] {
			hasher.update((part.len() as u64).to_be_bytes());
			hasher.update(part.as_bytes());
		}
		for scope in self.scopes.iter() {
			hasher.update((scope.len() as u64).to_be_bytes());
			hasher.update(scope.as_bytes());
		}

		URL_SAFE_NO_PAD.encode(hasher.finalize())
	}
}
