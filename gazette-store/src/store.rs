use async_trait::async_trait;
use gazette_common::{DeliveryLogRecord, EmailAddress, NewSubscriber, Subscriber, SubscriberId};

/// Position of one page in the active-subscriber listing
///
/// Pages are keyed by the last id already seen rather than by an offset, so
/// subscribers deactivated mid-listing never shift later rows out of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number, for logging
    pub number: u64,
    /// Maximum number of records in the page
    pub size: usize,
    /// Only subscribers with a greater id belong to this page
    pub after: Option<SubscriberId>,
}

impl PageRequest {
    #[must_use]
    pub const fn first(size: usize) -> Self {
        Self {
            number: 0,
            size,
            after: None,
        }
    }

    /// The request continuing after the last record of `page`
    #[must_use]
    pub fn next(self, page: &SubscriberPage) -> Self {
        Self {
            number: self.number + 1,
            size: self.size,
            after: page.last_id().or(self.after),
        }
    }
}

/// One page of active subscribers, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberPage {
    pub records: Vec<Subscriber>,
    pub has_next: bool,
}

impl SubscriberPage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn last_id(&self) -> Option<SubscriberId> {
        self.records.last().map(|s| s.id)
    }
}

/// Persistent access to subscriber records
///
/// Email uniqueness is the store's job. Implementations must reject a second
/// subscriber with the same email with [`StoreError::DuplicateKey`], even
/// when the two inserts race.
///
/// [`StoreError::DuplicateKey`]: crate::StoreError::DuplicateKey
#[async_trait]
pub trait SubscriberStore: Send + Sync + std::fmt::Debug {
    /// Look up a subscriber by email, active or not
    ///
    /// # Errors
    /// If the store cannot be queried
    async fn find_by_email(&self, email: &EmailAddress) -> crate::Result<Option<Subscriber>>;

    /// Persist a new subscriber and return it with its assigned id
    ///
    /// # Errors
    /// [`StoreError::DuplicateKey`](crate::StoreError::DuplicateKey) if the
    /// email is already taken, or any store failure
    async fn insert(&self, subscriber: NewSubscriber) -> crate::Result<Subscriber>;

    /// Write back changes to an existing subscriber
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) if the id is
    /// unknown, or any store failure
    async fn save(&self, subscriber: &Subscriber) -> crate::Result<Subscriber>;

    /// Count subscribers with `active` set
    ///
    /// # Errors
    /// If the store cannot be queried
    async fn count_active(&self) -> crate::Result<u64>;

    /// Fetch one page of active subscribers ordered by ascending id
    ///
    /// # Errors
    /// If the store cannot be queried
    async fn find_active_page(&self, page: PageRequest) -> crate::Result<SubscriberPage>;
}

/// Append-only persistence of delivery outcomes
#[async_trait]
pub trait DeliveryLogStore: Send + Sync + std::fmt::Debug {
    /// Persist all records as one atomic unit
    ///
    /// Either every record is stored or none is. An empty slice is a no-op.
    ///
    /// # Errors
    /// If the write fails; nothing from `records` is persisted in that case
    async fn save_all(&self, records: &[DeliveryLogRecord]) -> crate::Result<()>;

    /// Label of the issue in the record with the latest send timestamp
    ///
    /// # Errors
    /// If the store cannot be queried
    async fn find_most_recent_issue_label(&self) -> crate::Result<Option<String>>;
}
