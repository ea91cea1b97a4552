//! Token material: redacted secrets and normalized token sets.

pub mod secret;
pub mod set;
