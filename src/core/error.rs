//! Error types for the HA control plane.

use thiserror::Error;

/// Result type alias for control plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in control plane operations.
///
/// Probe failures never surface here: they are folded into an unhealthy
/// [`HealthCheckResult`](crate::region::HealthCheckResult). A fleet with no
/// routable region is likewise not an error, `route` returns `None`.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    #[error("Region already registered: {0}")]
    RegionExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Failover errors
    #[error("Failover event not found: {0}")]
    FailoverNotFound(String),

    #[error("Failover {0} is not awaiting approval")]
    FailoverNotPending(String),

    #[error("Failover execution failed: {0}")]
    FailoverExecution(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a failover execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::FailoverExecution(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
