// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing how the credential plugin served its calls.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	misses: AtomicU64,
	refreshes: AtomicU64,
	refresh_failures: AtomicU64,
	full_flows: AtomicU64,
}
impl CacheMetrics {
	/// Calls answered from the cache without any network traffic.
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Calls that found no entry at all.
	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	/// Refresh attempts made for expired entries.
	pub fn refreshes(&self) -> u64 {
		self.refreshes.load(Ordering::Relaxed)
	}

	/// Refresh attempts that fell back to a full grant.
	pub fn refresh_failures(&self) -> u64 {
		self.refresh_failures.load(Ordering::Relaxed)
	}

	/// Full grant executions.
	pub fn full_flows(&self) -> u64 {
		self.full_flows.load(Ordering::Relaxed)
	}

	pub(crate) fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_miss(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh_failure(&self) {
		self.refresh_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_full_flow(&self) {
		self.full_flows.fetch_add(1, Ordering::Relaxed);
	}
}
