//! Error types for Vakt

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Startup errors. Both are fatal: the hosting process must abort
    // rather than serve with a broken or unauthenticated directory link.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Directory connection failed: {0}")]
    Connection(String),

    // Request errors, returned to the immediate caller
    #[error("Request source {0} is not a trusted proxy")]
    UntrustedSource(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Lookup errors. These are absorbed at the cache boundary and turned
    // into empty results; they never reach an authorization caller.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_fatal() {
        assert!(Error::Configuration("missing directory.url".into()).is_fatal());
        assert!(Error::Connection("bind refused".into()).is_fatal());
        assert!(!Error::InvalidArgument("empty account name".into()).is_fatal());
        assert!(!Error::UntrustedSource("192.0.2.9".into()).is_fatal());
    }
}
