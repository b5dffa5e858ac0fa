//! Choosing which issue goes out next
//!
//! Issues are ordered by the number embedded in their label, so `n10.md`
//! follows `n2.md`. The next issue is the one after whichever issue the
//! delivery log saw most recently.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use gazette_common::{Issue, internal, issue_ordinal};
use gazette_store::DeliveryLogStore;
use serde::Deserialize;

use crate::error::SequencingError;

/// Where issues come from
#[async_trait]
pub trait IssueSource: Send + Sync + std::fmt::Debug {
    /// Labels of every available issue, in no particular order
    ///
    /// # Errors
    /// If the source cannot be listed
    async fn labels(&self) -> Result<Vec<String>, SequencingError>;

    /// Load the issue with `label`
    ///
    /// # Errors
    /// [`SequencingError::IssueNotFound`] if there is no such issue, or if the
    /// source cannot be read
    async fn load(&self, label: &str) -> Result<Issue, SequencingError>;
}

/// Issues stored as files in one directory, labelled by file name
#[derive(Debug, Clone)]
pub struct DirectoryIssueSource {
    directory: PathBuf,
    extension: String,
}

impl DirectoryIssueSource {
    /// Serve every `*.{extension}` file directly inside `directory`
    pub fn new(directory: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension.as_str()))
    }
}

#[async_trait]
impl IssueSource for DirectoryIssueSource {
    async fn labels(&self) -> Result<Vec<String>, SequencingError> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    directory = %self.directory.display(),
                    "Issue directory does not exist"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut labels = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || !self.matches(&path) {
                continue;
            }

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                labels.push(name.to_string());
            }
        }

        Ok(labels)
    }

    async fn load(&self, label: &str) -> Result<Issue, SequencingError> {
        // Labels are bare file names; anything else is not one of ours
        if Path::new(label).file_name().and_then(|n| n.to_str()) != Some(label) {
            return Err(SequencingError::IssueNotFound(label.to_string()));
        }

        match tokio::fs::read_to_string(self.directory.join(label)).await {
            Ok(content) => Ok(Issue::new(label, content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SequencingError::IssueNotFound(label.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Fixed set of issues held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticIssueSource {
    issues: Vec<Issue>,
}

impl StaticIssueSource {
    pub fn new(issues: impl IntoIterator<Item = Issue>) -> Self {
        Self {
            issues: issues.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IssueSource for StaticIssueSource {
    async fn labels(&self) -> Result<Vec<String>, SequencingError> {
        Ok(self.issues.iter().map(|issue| issue.label.clone()).collect())
    }

    async fn load(&self, label: &str) -> Result<Issue, SequencingError> {
        self.issues
            .iter()
            .find(|issue| issue.label == label)
            .cloned()
            .ok_or_else(|| SequencingError::IssueNotFound(label.to_string()))
    }
}

/// What to do when the last sent issue is no longer available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum GapPolicy {
    /// Refuse to pick an issue and report [`SequencingError::SequencingGap`]
    #[default]
    Fail,
    /// Start over from the first available issue
    RestartFromFirst,
}

const fn default_gap_policy() -> GapPolicy {
    GapPolicy::Fail
}

fn default_directory() -> PathBuf {
    PathBuf::from("newsletters")
}

fn default_extension() -> String {
    "md".to_string()
}

/// Issue source and sequencing configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuesConfig {
    /// Directory holding one file per issue
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Extension of issue files, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_gap_policy")]
    pub gap_policy: GapPolicy,
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            extension: default_extension(),
            gap_policy: default_gap_policy(),
        }
    }
}

impl IssuesConfig {
    #[must_use]
    pub fn source(&self) -> DirectoryIssueSource {
        DirectoryIssueSource::new(&self.directory, &self.extension)
    }
}

/// Sort labels by their numeric token
///
/// Labels with equal tokens, including every label without digits (token
/// 0), keep their lexical order.
#[must_use]
pub fn order_labels(mut labels: Vec<String>) -> Vec<String> {
    labels.sort();
    labels.sort_by_key(|label| issue_ordinal(label));
    labels
}

/// Pick the label that follows `last_sent` in `ordered`
///
/// # Errors
/// [`SequencingError::SequencingGap`] if `last_sent` is not in `ordered` and
/// `policy` is [`GapPolicy::Fail`]
pub fn select_next<'a>(
    ordered: &'a [String],
    last_sent: Option<&str>,
    policy: GapPolicy,
) -> Result<Option<&'a str>, SequencingError> {
    let Some(last_sent) = last_sent else {
        return Ok(ordered.first().map(String::as_str));
    };

    match ordered.iter().position(|label| label == last_sent) {
        Some(index) => Ok(ordered.get(index + 1).map(String::as_str)),
        None => match policy {
            GapPolicy::Fail => Err(SequencingError::SequencingGap {
                label: last_sent.to_string(),
            }),
            GapPolicy::RestartFromFirst => {
                tracing::warn!(
                    last_sent,
                    "Last sent issue is no longer available, restarting from the first issue"
                );
                Ok(ordered.first().map(String::as_str))
            }
        },
    }
}

/// Decides which issue to publish next
#[derive(Debug, Clone)]
pub struct IssueSequencer {
    source: Arc<dyn IssueSource>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    gap_policy: GapPolicy,
}

impl IssueSequencer {
    pub fn new(
        source: Arc<dyn IssueSource>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        gap_policy: GapPolicy,
    ) -> Self {
        Self {
            source,
            delivery_log,
            gap_policy,
        }
    }

    #[must_use]
    pub const fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    /// Every available issue label, in publishing order
    ///
    /// # Errors
    /// If the issue source cannot be listed
    pub async fn load_available_issues(&self) -> Result<Vec<String>, SequencingError> {
        Ok(order_labels(self.source.labels().await?))
    }

    /// The issue to publish next, or `None` once every issue has been sent
    ///
    /// # Errors
    /// [`SequencingError::SequencingGap`] under [`GapPolicy::Fail`] when the
    /// last sent issue has disappeared, or any source or store failure
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn next_issue(&self) -> Result<Option<Issue>, SequencingError> {
        let ordered = self.load_available_issues().await?;
        let last_sent = self.delivery_log.find_most_recent_issue_label().await?;

        internal!(
            "Sequencing {} available issues, last sent {:?}",
            ordered.len(),
            last_sent
        );

        match select_next(&ordered, last_sent.as_deref(), self.gap_policy)? {
            Some(label) => Ok(Some(self.source.load(label).await?)),
            None => Ok(None),
        }
    }
}
