//! MessageHandler trait - Dispatcher callback interface
//!
//! The handler owns the interpretation of message bodies; the consumer only
//! turns its outcome into an acknowledgment decision.

use std::fmt;

use thiserror::Error;

/// Failure reported by a handler for one delivery
///
/// Never a consumer-level fault: the delivery is rejected with requeue.
#[derive(Debug, Error)]
#[error("handler failed: {message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a handler error wrapping an underlying cause
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Failure description
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Delivery handler trait
///
/// All handlers must implement this trait. One invocation is in flight at a
/// time per connection, so per-connection delivery order is preserved.
#[trait_variant::make(MessageHandler: Send)]
pub trait LocalMessageHandler {
    /// Handle one message body
    ///
    /// # Errors
    /// Returning an error rejects the delivery with requeue
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError>;
}

/// Adapter turning a synchronous closure into a [`MessageHandler`]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F>
where
    F: Fn(&[u8]) -> Result<(), HandlerError> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

impl<F> MessageHandler for HandlerFn<F>
where
    F: Fn(&[u8]) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, body: &[u8]) -> Result<(), HandlerError> {
        (self.f)(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_fn_outcomes() {
        let handler = HandlerFn::new(|body: &[u8]| {
            if body.is_empty() {
                Err(HandlerError::new("empty body"))
            } else {
                Ok(())
            }
        });

        assert!(MessageHandler::handle(&handler, &[0x01]).await.is_ok());
        let err = MessageHandler::handle(&handler, &[]).await.unwrap_err();
        assert_eq!(err.message(), "empty body");
        assert_eq!(err.to_string(), "handler failed: empty body");
    }

    #[test]
    fn test_handler_error_source() {
        let io = std::io::Error::other("disk full");
        let err = HandlerError::with_source("persist failed", io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }
}
