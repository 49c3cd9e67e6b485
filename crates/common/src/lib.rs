//! Shared types for the token swap relay workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
