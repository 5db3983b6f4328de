//! Vakt Core Library
//!
//! Configuration sections and the error taxonomy shared by the vakt
//! directory-authorization cache.

pub mod config;
pub mod error;

pub use config::VaktConfig;
pub use error::{Error, Result};

/// Vakt version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header the upstream proxy uses to assert the authenticated account name,
/// unless overridden in the trust settings.
pub const DEFAULT_TRUSTED_HEADER: &str = "X-Control-Header";
