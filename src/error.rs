//! Error types for frame streaming.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether a submission can simply be retried.
//!
//! ## Error Categories
//!
//! - **Connection Errors**: the broker cannot be reached or the handshake failed
//! - **Publish Errors**: the request could not be handed to the broker
//! - **Broker Errors**: queue declaration, consumer setup or mid-stream failures
//! - **Decode Errors**: malformed request or frame payloads
//! - **Timeout / Cancelled**: a session ended before its last frame arrived
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use fluidstream::FluidError;
//!
//! let error = FluidError::connection_failed("broker not running");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for fluidstream operations.
pub type Result<T, E = FluidError> = std::result::Result<T, E>;

/// Main error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FluidError {
    #[error("Failed to connect to broker: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to publish to '{destination}': {reason}")]
    Publish {
        destination: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Broker error during {operation}: {reason}")]
    Broker {
        operation: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Session timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Session cancelled")]
    Cancelled,

    #[error("Teardown of consumer '{consumer_tag}' failed: {reason}")]
    Teardown { consumer_tag: String, reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FluidError {
    /// Returns whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FluidError::Connection { .. } => true,
            FluidError::Publish { .. } => true,
            FluidError::Broker { .. } => true,
            FluidError::Timeout { .. } => true,
            FluidError::Cancelled => true,
            FluidError::Teardown { .. } => false,
            FluidError::Decode { .. } => false,
            FluidError::InvalidRequest { .. } => false,
            FluidError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            FluidError::Connection { .. } => vec![
                "Ensure the message broker is running",
                "Check the broker URL, port and credentials",
                "Verify network connectivity to the broker host",
            ],
            FluidError::Publish { .. } => vec![
                "Reconnect the client and resubmit the request",
                "Check that the broker channel is still open",
            ],
            FluidError::Broker { .. } => vec![
                "Resubmit the request",
                "Inspect broker logs for channel or queue errors",
            ],
            FluidError::Decode { .. } => vec![
                "Check that producer and consumer share the same message schema",
                "Verify the payload was not truncated in transit",
            ],
            FluidError::Timeout { .. } => vec![
                "Increase the request timeout",
                "Check that the simulation service is running",
                "Request fewer frames or a smaller resolution",
            ],
            FluidError::Cancelled => vec!["Resubmit the request if it is still needed"],
            FluidError::Teardown { .. } => vec![
                "Ignore if the connection was already closing",
                "Inspect broker logs for orphaned consumers",
            ],
            FluidError::InvalidRequest { .. } => vec![
                "Use a positive frame count",
                "Use a positive width and height",
            ],
            FluidError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Check FLUID_* environment variables",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        FluidError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FluidError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for publish errors.
    pub fn publish_failed(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        FluidError::Publish { destination: destination.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for publish errors with source.
    pub fn publish_failed_with_source(
        destination: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FluidError::Publish {
            destination: destination.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for broker errors.
    pub fn broker_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        FluidError::Broker { operation: operation.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for broker errors with source.
    pub fn broker_error_with_source(
        operation: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        FluidError::Broker {
            operation: operation.into(),
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Helper constructor for decode errors.
    pub fn decode_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        FluidError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for invalid request errors.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        FluidError::InvalidRequest { reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(reason: impl Into<String>) -> Self {
        FluidError::Config { reason: reason.into(), path: None, source: None }
    }
}

impl From<serde_yaml_ng::Error> for FluidError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        FluidError::Config {
            reason: "invalid YAML".to_string(),
            path: None,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            destination in "[a-z_]{1,16}",
            duration_ms in 1u64..60000u64
          ) {
            let connection = FluidError::connection_failed(reason.clone());
            prop_assert!(connection.to_string().contains(&reason));

            let publish = FluidError::publish_failed(destination.clone(), reason.clone());
            let publish_msg = publish.to_string();
            prop_assert!(publish_msg.contains(&destination));
            prop_assert!(publish_msg.contains(&reason));

            let timeout = FluidError::Timeout { duration: Duration::from_millis(duration_ms) };
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn source_chain_is_preserved(base_message in ".*") {
            let source: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));
            let error = FluidError::broker_error_with_source("consume", "channel closed", source);

            let inner = std::error::Error::source(&error).expect("source should be chained");
            prop_assert_eq!(inner.to_string(), base_message);
          }
        }
    }

    #[test]
    fn error_constructors_validation() {
        assert!(matches!(FluidError::connection_failed("x"), FluidError::Connection { .. }));
        assert!(matches!(FluidError::publish_failed("q", "x"), FluidError::Publish { .. }));
        assert!(matches!(FluidError::broker_error("op", "x"), FluidError::Broker { .. }));
        assert!(matches!(FluidError::decode_error("frame", "x"), FluidError::Decode { .. }));
        assert!(matches!(FluidError::invalid_request("x"), FluidError::InvalidRequest { .. }));
        assert!(matches!(FluidError::config_error("x"), FluidError::Config { .. }));
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<FluidError>();

        let error = FluidError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let connection = FluidError::connection_failed("test");
        let decode = FluidError::decode_error("frame", "truncated varint");
        let timeout = FluidError::Timeout { duration: Duration::from_secs(1) };

        assert!(connection.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!decode.is_retryable());
        assert!(!FluidError::invalid_request("zero frames").is_retryable());

        for error in [&connection, &decode, &timeout] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn from_conversions_work() {
        let yaml_err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let error: FluidError = yaml_err.into();
        assert!(matches!(error, FluidError::Config { .. }));
    }
}
