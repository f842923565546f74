//! Error types for the traversal engine
//!
//! Errors are grouped by the stage that produced them so callers can decide
//! whether to retry, fall back to a relay, or surface a contract violation.
//!
//! # Error Categories
//!
//! - **Transient**: a probe, a clock sample or a socket operation failed and a
//!   fresh attempt may succeed
//! - **Permanent**: the inputs cannot work (unpredictable NAT, bad address,
//!   out-of-order protocol message, invalid configuration)
//! - **Punch failure**: no socket survived the connect burst; the caller may
//!   run the whole protocol again with a new session, but never the same one
//!
//! # Example
//!
//! ```no_run
//! use rift_core::{Result, RiftError};
//!
//! fn handle(err: RiftError) {
//!     if matches!(err, RiftError::CannotPredict(_) | RiftError::PunchFailed(_)) {
//!         println!("falling back to relay: {}", err);
//!     } else if err.is_transient() {
//!         println!("retrying: {}", err);
//!     }
//! }
//! ```

use std::borrow::Cow;
use thiserror::Error;

/// Errors raised by probing, prediction, the punch protocol and its sockets
#[derive(Debug, Error, Clone)]
pub enum RiftError {
    // ============ Probe Errors ============
    /// A single mapping or binding probe failed
    #[error("Probe failed: {0}")]
    Probe(Cow<'static, str>),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(Cow<'static, str>),

    /// Clock synchronization produced no usable estimate
    #[error("Clock synchronization failed: {0}")]
    Clock(Cow<'static, str>),

    // ============ Prediction Errors ============
    /// The NAT combination has no prediction strategy
    #[error("Cannot predict mappings: {0}")]
    CannotPredict(Cow<'static, str>),

    /// A mapping or mapping list violates port rules
    #[error("Invalid mapping: {0}")]
    InvalidMapping(Cow<'static, str>),

    // ============ Protocol Errors ============
    /// Session state machine received an out-of-order message
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Malformed or mismatched punch protocol message
    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    /// Peer address failed validation
    #[error("Invalid peer address: {0}")]
    InvalidAddress(Cow<'static, str>),

    /// No session exists for the given peer and pipe
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // ============ Punch Errors ============
    /// No connection survived the connect burst
    #[error("Hole punching failed: {0}")]
    PunchFailed(Cow<'static, str>),

    // ============ Configuration & Operational Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Channel send/receive error
    #[error("Channel error: {0}")]
    Channel(Cow<'static, str>),

    /// Background task or worker thread failed
    #[error("Task join error: {0}")]
    TaskJoin(Cow<'static, str>),
}

impl RiftError {
    /// Returns true if a fresh attempt may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RiftError::Probe(_)
                | RiftError::Timeout(_)
                | RiftError::Clock(_)
                | RiftError::Io(_)
                | RiftError::Channel(_)
        )
    }

    /// Returns true if retrying with the same inputs cannot succeed
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RiftError::CannotPredict(_)
                | RiftError::InvalidMapping(_)
                | RiftError::InvalidState(_)
                | RiftError::Protocol(_)
                | RiftError::InvalidAddress(_)
                | RiftError::SessionNotFound(_)
                | RiftError::InvalidConfig(_)
        )
    }

    /// Returns true if the operation should be retried in place
    ///
    /// Clock failures are retried with fresh samples; probe and socket
    /// failures are retried by the component that issued them.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient() && !matches!(self, RiftError::Timeout(_) | RiftError::Channel(_))
    }

    /// Create a probe error with static context (zero allocation)
    #[must_use]
    pub const fn probe(context: &'static str) -> Self {
        RiftError::Probe(Cow::Borrowed(context))
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        RiftError::Timeout(Cow::Borrowed(context))
    }

    /// Create a prediction error with static context (zero allocation)
    #[must_use]
    pub const fn cannot_predict(context: &'static str) -> Self {
        RiftError::CannotPredict(Cow::Borrowed(context))
    }

    /// Create an invalid mapping error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_mapping(context: &'static str) -> Self {
        RiftError::InvalidMapping(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        RiftError::InvalidState(Cow::Borrowed(context))
    }

    /// Create a protocol error with static context (zero allocation)
    #[must_use]
    pub const fn protocol(context: &'static str) -> Self {
        RiftError::Protocol(Cow::Borrowed(context))
    }

    /// Create an invalid address error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_address(context: &'static str) -> Self {
        RiftError::InvalidAddress(Cow::Borrowed(context))
    }

    /// Create a punch failure with static context (zero allocation)
    #[must_use]
    pub const fn punch_failed(context: &'static str) -> Self {
        RiftError::PunchFailed(Cow::Borrowed(context))
    }
}

impl From<std::io::Error> for RiftError {
    fn from(err: std::io::Error) -> Self {
        RiftError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RiftError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RiftError::timeout("deadline elapsed")
    }
}

/// Result type for traversal operations
pub type Result<T> = std::result::Result<T, RiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(RiftError::probe("test").is_transient());
        assert!(RiftError::timeout("test").is_transient());
        assert!(RiftError::Clock(Cow::Borrowed("test")).is_transient());
        assert!(RiftError::Io("test".into()).is_transient());
        assert!(RiftError::Channel(Cow::Borrowed("test")).is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(RiftError::cannot_predict("test").is_permanent());
        assert!(RiftError::invalid_mapping("test").is_permanent());
        assert!(RiftError::invalid_state("test").is_permanent());
        assert!(RiftError::protocol("test").is_permanent());
        assert!(RiftError::invalid_address("test").is_permanent());
        assert!(RiftError::SessionNotFound("peer/pipe".into()).is_permanent());
        assert!(RiftError::InvalidConfig(Cow::Borrowed("test")).is_permanent());
    }

    #[test]
    fn test_punch_failure_is_neither() {
        let err = RiftError::punch_failed("window elapsed");
        assert!(!err.is_transient());
        assert!(!err.is_permanent());
        assert!(!err.should_retry());
    }

    #[test]
    fn test_should_retry() {
        assert!(RiftError::probe("test").should_retry());
        assert!(RiftError::Clock(Cow::Borrowed("test")).should_retry());
        assert!(!RiftError::timeout("test").should_retry());
        assert!(!RiftError::invalid_state("test").should_retry());
    }

    #[test]
    fn test_error_display() {
        let err = RiftError::cannot_predict("symmetric NAT with random delta");
        assert_eq!(
            err.to_string(),
            "Cannot predict mappings: symmetric NAT with random delta"
        );

        let err = RiftError::SessionNotFound("alice/pipe0".into());
        assert_eq!(err.to_string(), "Session not found: alice/pipe0");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let err: RiftError = io_err.into();
        assert!(matches!(err, RiftError::Io(_)));
        assert!(err.to_string().contains("port busy"));
    }

    #[test]
    fn test_mutual_exclusivity() {
        let errors = [
            RiftError::probe("a"),
            RiftError::timeout("b"),
            RiftError::cannot_predict("c"),
            RiftError::invalid_state("d"),
            RiftError::punch_failed("e"),
            RiftError::Io("f".into()),
        ];
        for err in &errors {
            assert!(!(err.is_transient() && err.is_permanent()), "{err}");
        }
    }
}
