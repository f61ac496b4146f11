//! Shared types for the calendar session client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
