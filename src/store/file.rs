//! On-disk [`TokenCache`]: one JSON file per key inside a cache directory.
//!
//! Several processes may share the directory. Entries are written to a temporary file in the
//! same directory and renamed over the target, so a reader sees either the old or the new
//! entry in full. The last writer wins.

// std
use std::{
	fs,
	io::{self, Write},
};
// crates.io
use tempfile::NamedTempFile;
// self
use crate::{
	_prelude::*,
	auth::TokenSet,
	store::{CacheKey, StoreError, StoreFuture, TokenCache},
};

/// Default cache location used by cluster-access clients, relative to the home directory.
pub const DEFAULT_TOKEN_CACHE_DIR: &str = "~/.kube/cache/oidc-login";

/// Directory-backed token cache.
#[derive(Clone, Debug)]
pub struct FileCache {
	dir: PathBuf,
}
impl FileCache {
	/// Uses `dir` for entries; it is created on the first write.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// Directory holding the entries.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// File an entry for `key` lives in.
	pub fn path_for(&self, key: &CacheKey) -> PathBuf {
		self.dir.join(key.fingerprint())
	}

	/// Unreadable and unparsable entries are reported as absent.
	fn read(&self, key: &CacheKey) -> Option<TokenSet> {
		let path = self.path_for(key);
		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
			Err(e) => {
				tracing::warn!(
					path = %path.display(),
					error = %e,
					"Ignoring unreadable cache entry."
				);

				return None;
			},
		};

		match serde_json::from_slice(&bytes) {
			Ok(tokens) => Some(tokens),
			Err(e) => {
				tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry.");

				None
			},
		}
	}

	fn write(&self, key: &CacheKey, tokens: &TokenSet) -> Result<(), StoreError> {
		let path = self.path_for(key);
		let serialized = serde_json::to_vec(tokens).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize cache entry: {e}"),
		})?;

		create_dir(&self.dir)?;

		let mut tmp = tempfile::Builder::new()
			.prefix(".entry-")
			.suffix(".tmp")
			.tempfile_in(&self.dir)
			.map_err(|e| backend("create a temporary file in", &self.dir, e))?;

		tmp.write_all(&serialized).map_err(|e| backend("write", tmp.path(), e))?;
		tmp.as_file().sync_all().map_err(|e| backend("sync", tmp.path(), e))?;
		persist(tmp, &path)?;

		tracing::debug!(path = %path.display(), "Cache entry written.");

		Ok(())
	}

	fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
		let path = self.path_for(key);

		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend("remove", &path, e)),
		}
	}
}
impl TokenCache for FileCache {
	fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<TokenSet>> {
		Box::pin(async move { Ok(self.read(key)) })
	}

	fn store<'a>(&'a self, key: &'a CacheKey, tokens: &'a TokenSet) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.write(key, tokens) })
	}

	fn invalidate<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.remove(key) })
	}
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> Result<(), StoreError> {
	use std::os::unix::fs::DirBuilderExt;

	fs::DirBuilder::new()
		.recursive(true)
		.mode(0o700)
		.create(dir)
		.map_err(|e| backend("create cache directory", dir, e))
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> Result<(), StoreError> {
	fs::create_dir_all(dir).map_err(|e| backend("create cache directory", dir, e))
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), StoreError> {
	tmp.persist(path).map(drop).map_err(|e| backend("replace", path, e.error))
}

fn backend(action: &str, path: &Path, e: io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::ScopeSet;

	fn key() -> CacheKey {
		CacheKey {
			issuer: "https://idp.example.com".into(),
			client_id: "kube".into(),
			scopes: ScopeSet::openid_with(["email"]).expect("Scope fixture should be valid."),
		}
	}

	fn tokens(access: &str) -> TokenSet {
		TokenSet::builder()
			.id_token("header.payload.signature")
			.access_token(access)
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Token set fixture should build.")
	}

	#[tokio::test]
	async fn store_then_lookup_returns_identical_tokens() {
		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let cache = FileCache::new(dir.path().join("nested"));
		let stored = tokens("access-1");

		cache.store(&key(), &stored).await.expect("Store should succeed.");

		let loaded = cache
			.lookup(&key())
			.await
			.expect("Lookup should succeed.")
			.expect("Entry should be present.");

		assert_eq!(loaded, stored);
		assert_eq!(
			serde_json::to_vec(&loaded).expect("Loaded entry should serialize."),
			fs::read(cache.path_for(&key())).expect("Entry file should be readable.")
		);
	}

	#[tokio::test]
	async fn overwrite_leaves_no_temporary_files() {
		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let cache = FileCache::new(dir.path());

		cache.store(&key(), &tokens("access-1")).await.expect("First store should succeed.");
		cache.store(&key(), &tokens("access-2")).await.expect("Second store should succeed.");

		let names = fs::read_dir(dir.path())
			.expect("Cache dir should be listable.")
			.map(|entry| entry.expect("Entry should be readable.").file_name())
			.collect::<Vec<_>>();
		let loaded = cache
			.lookup(&key())
			.await
			.expect("Lookup should succeed.")
			.expect("Entry should be present.");

		assert_eq!(names, vec![std::ffi::OsString::from(key().fingerprint())]);
		assert_eq!(loaded.access_token.expose(), "access-2");
	}

	#[tokio::test]
	async fn corrupt_or_missing_entries_are_misses() {
		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let cache = FileCache::new(dir.path());

		assert!(cache.lookup(&key()).await.expect("Lookup should succeed.").is_none());

		fs::write(cache.path_for(&key()), b"{\"id_token\":").expect("Fixture should be written.");

		assert!(cache.lookup(&key()).await.expect("Lookup should succeed.").is_none());
	}

	#[tokio::test]
	async fn invalidate_removes_the_entry_and_tolerates_absence() {
		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let cache = FileCache::new(dir.path());

		cache.store(&key(), &tokens("access")).await.expect("Store should succeed.");
		cache.invalidate(&key()).await.expect("Invalidate should succeed.");
		cache.invalidate(&key()).await.expect("Second invalidate should succeed.");

		assert!(cache.lookup(&key()).await.expect("Lookup should succeed.").is_none());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn entries_are_private_to_the_owner() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempfile::tempdir().expect("Temp dir should be created.");
		let cache = FileCache::new(dir.path());

		cache.store(&key(), &tokens("access")).await.expect("Store should succeed.");

		let mode = fs::metadata(cache.path_for(&key()))
			.expect("Entry metadata should be readable.")
			.permissions()
			.mode();

		assert_eq!(mode & 0o077, 0);
	}
}
