//! Core records shared by the store, the delivery pipeline and the API

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::EmailAddress;

/// Store-assigned subscriber identity
///
/// Monotonically increasing, which makes it the stable key active pages are
/// ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscriber {
    pub email: EmailAddress,
    pub active: bool,
}

impl NewSubscriber {
    /// New subscriptions start out active
    #[must_use]
    pub const fn new(email: EmailAddress) -> Self {
        Self {
            email,
            active: true,
        }
    }
}

/// A persisted subscriber
///
/// Subscribers are never deleted; unsubscribing only clears `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub email: EmailAddress,
    pub active: bool,
}

impl Subscriber {
    pub const fn activate(&mut self) {
        self.active = true;
    }

    pub const fn deactivate(&mut self) {
        self.active = false;
    }
}

/// One newsletter issue, identified by its file name
///
/// Content is shared so that every per-subscriber task and log record can
/// hold it without copying the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub label: String,
    pub content: Arc<str>,
}

impl Issue {
    #[must_use]
    pub fn new(label: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
        }
    }

    /// Ordering token for this issue, see [`issue_ordinal`]
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        issue_ordinal(&self.label)
    }
}

/// Extract the ordering token embedded in an issue label
///
/// All ASCII digits in the label are concatenated and read as one number, so
/// `newsletter-03.md` is 3 and `n10.md` is 10. Labels without digits, or whose
/// digits overflow a `u64`, order as 0.
#[must_use]
pub fn issue_ordinal(label: &str) -> u64 {
    let digits: String = label.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Result of handing one issue to the mail transport for one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Success,
    Failure,
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn from_sent(sent: bool) -> Self {
        if sent { Self::Success } else { Self::Failure }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(format!("Unknown delivery outcome: {other}")),
        }
    }
}

/// Identifier for a delivery log record
///
/// A ULID, so records sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryRecordId(ulid::Ulid);

impl DeliveryRecordId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }

    /// Parse the textual form produced by `Display`
    ///
    /// # Errors
    ///
    /// If `value` is not a valid ULID
    pub fn parse(value: &str) -> Result<Self, ulid::DecodeError> {
        ulid::Ulid::from_string(value).map(Self)
    }
}

impl fmt::Display for DeliveryRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of one send attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogRecord {
    pub id: DeliveryRecordId,
    pub subscriber_id: SubscriberId,
    pub issue_label: String,
    pub content: Arc<str>,
    pub sent_at: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
}

impl DeliveryLogRecord {
    /// Record the outcome of sending `issue` to `subscriber`, stamped now
    #[must_use]
    pub fn new(subscriber: &Subscriber, issue: &Issue, outcome: DeliveryOutcome) -> Self {
        Self {
            id: DeliveryRecordId::generate(),
            subscriber_id: subscriber.id,
            issue_label: issue.label.clone(),
            content: Arc::clone(&issue.content),
            sent_at: Utc::now(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_issue_ordinal() {
        assert_eq!(issue_ordinal("newsletter-03.md"), 3);
        assert_eq!(issue_ordinal("n10.md"), 10);
        assert_eq!(issue_ordinal("intro.md"), 0);
        assert_eq!(issue_ordinal("v2-part10.md"), 210);
        assert_eq!(issue_ordinal(&"9".repeat(40)), 0);
    }

    #[test]
    fn test_outcome_round_trip_through_str() {
        for outcome in [DeliveryOutcome::Success, DeliveryOutcome::Failure] {
            assert_eq!(outcome.as_str().parse::<DeliveryOutcome>(), Ok(outcome));
        }
        assert!("MAYBE".parse::<DeliveryOutcome>().is_err());
        assert_eq!(DeliveryOutcome::from_sent(true), DeliveryOutcome::Success);
        assert_eq!(DeliveryOutcome::from_sent(false), DeliveryOutcome::Failure);
    }

    #[test]
    fn test_record_snapshots_issue() {
        let subscriber = Subscriber {
            id: SubscriberId(7),
            email: EmailAddress::parse("reader@example.com").unwrap(),
            active: true,
        };
        let issue = Issue::new("newsletter-01.md", "# Hello");

        let record = DeliveryLogRecord::new(&subscriber, &issue, DeliveryOutcome::Success);

        assert_eq!(record.subscriber_id, SubscriberId(7));
        assert_eq!(record.issue_label, "newsletter-01.md");
        assert_eq!(&*record.content, "# Hello");
        assert!(record.outcome.is_success());
    }

    #[test]
    fn test_subscriber_lifecycle() {
        let mut subscriber = Subscriber {
            id: SubscriberId(1),
            email: EmailAddress::parse("reader@example.com").unwrap(),
            active: true,
        };
        subscriber.deactivate();
        assert!(!subscriber.active);
        subscriber.activate();
        assert!(subscriber.active);
    }
}
