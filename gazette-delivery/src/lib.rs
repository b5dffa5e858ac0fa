//! Newsletter pipeline: subscriptions, issue sequencing and distribution
//!
//! - [`SubscriptionManager`]: idempotent subscribe/unsubscribe
//! - [`IssueSequencer`]: which issue goes out next
//! - [`DistributionEngine`]: paged, bounded fan-out with per-page logging
//! - [`IssuePublisher`], [`DistributionWorker`] and [`Scheduler`]: the
//!   trigger path from a timer to a distribution run

mod engine;
mod error;
mod publisher;
mod scheduler;
mod sequencer;
mod subscription;
mod transport;
mod worker;

pub use engine::{DistributionConfig, DistributionEngine, DistributionSummary};
pub use error::{
    DistributionError, GazetteError, SequencingError, SubscriptionError, TransportError,
};
pub use publisher::{IssuePublisher, NewsletterDispatch, dispatch_channel};
pub use scheduler::{Schedule, Scheduler};
pub use sequencer::{
    DirectoryIssueSource, GapPolicy, IssueSequencer, IssueSource, IssuesConfig, StaticIssueSource,
    order_labels, select_next,
};
pub use subscription::{SubscribeOutcome, Subscription, SubscriptionManager};
pub use transport::{LoggingTransport, MailTransport};
pub use worker::DistributionWorker;
