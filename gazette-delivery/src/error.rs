//! Typed error handling for the newsletter pipeline.
//!
//! Each stage has its own error type:
//! - [`SubscriptionError`]: rejected or failed subscribe/unsubscribe calls
//! - [`SequencingError`]: choosing the next issue
//! - [`DistributionError`]: a run that could not complete
//! - [`TransportError`]: one send; always downgraded to a FAILURE record
//!
//! [`GazetteError`] wraps them for callers that drive the whole pipeline.

use gazette_common::ValidationError;
use gazette_store::StoreError;
use thiserror::Error;

/// Errors from [`SubscriptionManager`](crate::SubscriptionManager).
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The email address failed validation before reaching the store.
    #[error("Invalid email address: {0}")]
    InvalidEmail(#[from] ValidationError),

    /// A create lost the uniqueness race, yet the winner's record could not
    /// be found afterwards.
    #[error("Subscriber {email} was rejected as a duplicate but does not exist")]
    InvariantViolation { email: String },

    /// The store failed.
    #[error("Subscriber store error: {0}")]
    Store(#[from] StoreError),
}

impl SubscriptionError {
    /// Returns `true` if the caller supplied bad input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidEmail(_))
    }
}

/// Errors from [`IssueSequencer`](crate::IssueSequencer).
#[derive(Debug, Error)]
pub enum SequencingError {
    /// The most recently sent issue is no longer among the available issues.
    #[error("Last sent issue {label} is not among the available issues")]
    SequencingGap { label: String },

    /// An issue listed by the source could not be found when loaded.
    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    /// Reading issues failed.
    #[error("Issue source error: {0}")]
    Source(#[from] std::io::Error),

    /// The delivery log could not be queried.
    #[error("Delivery log error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that abort a distribution run.
///
/// Individual send failures never show up here; they are recorded as
/// FAILURE outcomes.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// The bulk write of a page's delivery records failed.
    ///
    /// Pages before `page` are persisted; `page` and later are not.
    #[error("Failed to persist delivery records for page {page}: {source}")]
    Persistence {
        page: u64,
        #[source]
        source: StoreError,
    },

    /// Counting or paging subscribers failed.
    #[error("Subscriber store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors a [`MailTransport`](crate::MailTransport) may raise for one send.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote side refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// The transport could not be reached.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// The send did not finish in time.
    #[error("Send timed out")]
    Timeout,
}

/// Top-level error for the newsletter pipeline.
#[derive(Debug, Error)]
pub enum GazetteError {
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Sequencing(#[from] SequencingError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The dispatch channel to the worker is closed.
    #[error("Dispatch channel closed")]
    ChannelClosed,

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GazetteError {
    /// Returns `true` if the caller supplied bad input.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Subscription(e) if e.is_validation())
    }

    /// Returns `true` if the pipeline cannot keep running after this error.
    ///
    /// A failed run or a sequencing gap is reported and the next trigger
    /// tries again; a closed channel or bad configuration is not recoverable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Config(_))
    }
}
