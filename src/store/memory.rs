//! In-process [`TokenCache`] for tests and embedders that keep tokens in memory.

// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	store::{CacheKey, StoreFuture, TokenCache},
};

/// Thread-safe map-backed token cache.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache(Arc<Mutex<HashMap<CacheKey, TokenSet>>>);
impl MemoryCache {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}
}
impl TokenCache for MemoryCache {
	fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<TokenSet>> {
		let found = self.0.lock().get(key).cloned();

		Box::pin(async move { Ok(found) })
	}

	fn store<'a>(&'a self, key: &'a CacheKey, tokens: &'a TokenSet) -> StoreFuture<'a, ()> {
		self.0.lock().insert(key.clone(), tokens.clone());

		Box::pin(async { Ok(()) })
	}

	fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
		self.0.lock().remove(key);

		Box::pin(async { Ok(()) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::ScopeSet;

	#[tokio::test]
	async fn clones_share_entries() {
		let cache = MemoryCache::default();
		let clone = cache.clone();
		let key = CacheKey {
			issuer: "https://idp.example.com".into(),
			client_id: "kube".into(),
			scopes: ScopeSet::openid_with(Vec::<String>::new())
				.expect("Scope fixture should be valid."),
		};
		let tokens = TokenSet::builder()
			.access_token("access")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token set fixture should build.");

		cache.store(&key, &tokens).await.expect("Store should succeed.");

		assert_eq!(clone.lookup(&key).await.expect("Lookup should succeed."), Some(tokens));
		assert_eq!(clone.len(), 1);

		clone.invalidate(&key).await.expect("Invalidate should succeed.");

		assert!(cache.is_empty());
	}
}
