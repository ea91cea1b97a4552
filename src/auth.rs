//! Auth-domain models: scope sets, token secrets, and the token sets handed to callers.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::{secret::*, set::*};
