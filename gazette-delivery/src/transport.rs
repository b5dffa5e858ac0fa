//! Outbound mail transport seam

use async_trait::async_trait;
use gazette_common::{EmailAddress, outgoing};

use crate::error::TransportError;

/// Sends one newsletter body to one address
///
/// `Ok(false)` and `Err(_)` both mean the send failed. The distribution
/// engine records either as a FAILURE and moves on.
#[async_trait]
pub trait MailTransport: Send + Sync + std::fmt::Debug {
    /// Send `content` to `to`
    ///
    /// # Errors
    /// If the transport could not attempt the send
    async fn send(&self, to: &EmailAddress, content: &str) -> Result<bool, TransportError>;
}

/// Transport that only logs the send and reports success
///
/// Stands in for a real mail provider in development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTransport;

#[async_trait]
impl MailTransport for LoggingTransport {
    async fn send(&self, to: &EmailAddress, content: &str) -> Result<bool, TransportError> {
        outgoing!(
            level = DEBUG,
            "Sending newsletter to {to} ({} bytes)",
            content.len()
        );
        Ok(true)
    }
}
