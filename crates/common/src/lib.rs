//! Shared types, config, and error definitions for the cache builder.

pub mod config;
pub mod error;
pub mod types;

pub use config::BuildConfig;
pub use error::Error;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
