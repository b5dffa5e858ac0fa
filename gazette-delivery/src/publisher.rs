//! Handing issues from the scheduler to the distribution worker

use chrono::{DateTime, Utc};
use gazette_common::Issue;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{error::GazetteError, sequencer::IssueSequencer};

/// One issue to distribute, as carried over the dispatch channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsletterDispatch {
    pub issue_label: String,
    pub issue_content: String,
    pub published_at: DateTime<Utc>,
}

impl NewsletterDispatch {
    #[must_use]
    pub fn new(issue: &Issue) -> Self {
        Self {
            issue_label: issue.label.clone(),
            issue_content: issue.content.to_string(),
            published_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn into_issue(self) -> Issue {
        Issue::new(self.issue_label, self.issue_content)
    }
}

/// Create the bounded channel between publisher and worker
#[must_use]
pub fn dispatch_channel(
    capacity: usize,
) -> (
    mpsc::Sender<NewsletterDispatch>,
    mpsc::Receiver<NewsletterDispatch>,
) {
    mpsc::channel(capacity.max(1))
}

/// Picks the next issue and hands it to the worker
#[derive(Debug, Clone)]
pub struct IssuePublisher {
    sequencer: IssueSequencer,
    sender: mpsc::Sender<NewsletterDispatch>,
}

impl IssuePublisher {
    pub const fn new(sequencer: IssueSequencer, sender: mpsc::Sender<NewsletterDispatch>) -> Self {
        Self { sequencer, sender }
    }

    #[must_use]
    pub const fn sequencer(&self) -> &IssueSequencer {
        &self.sequencer
    }

    /// Publish the next issue, if there is one
    ///
    /// Returns `false` when every available issue has already been sent.
    ///
    /// # Errors
    /// If sequencing fails or the worker has gone away
    pub async fn publish_next(&self) -> Result<bool, GazetteError> {
        let Some(issue) = self.sequencer.next_issue().await? else {
            tracing::info!("No issue left to publish");
            return Ok(false);
        };

        self.sender
            .send(NewsletterDispatch::new(&issue))
            .await
            .map_err(|_| GazetteError::ChannelClosed)?;

        tracing::info!(issue = %issue.label, "Published issue");
        Ok(true)
    }
}
