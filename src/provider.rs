//! Provider-facing descriptors (data), discovery metadata, and strategies (behavior).
//!
//! `descriptor` holds the caller-supplied identity of the provider/client pair that a cached
//! token belongs to. `metadata` models what OpenID discovery reports about the provider.
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook used by flows to
//! augment outgoing token requests and map error bodies into the crate's error taxonomy.

pub mod descriptor;
pub mod metadata;
pub mod strategy;

pub use descriptor::*;
pub use metadata::*;
pub use strategy::*;
