use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use gazette_common::{
    DeliveryLogRecord, EmailAddress, NewSubscriber, Subscriber, SubscriberId,
};
use parking_lot::RwLock;

use crate::{
    StoreError,
    store::{DeliveryLogStore, PageRequest, SubscriberPage, SubscriberStore},
};

#[derive(Debug, Default)]
struct Subscribers {
    by_id: BTreeMap<SubscriberId, Subscriber>,
    by_email: HashMap<EmailAddress, SubscriberId>,
    last_id: i64,
}

/// In-memory subscriber store
///
/// Subscribers live in a `BTreeMap` keyed by id, so active pages come out in
/// id order, with a secondary email index acting as the unique constraint.
/// Both maps sit behind one `RwLock`; the uniqueness check and the insert
/// happen under the same write guard, so racing inserts for one email
/// resolve to exactly one winner.
///
/// Intended for tests and development. Contents are lost on exit.
#[derive(Debug, Clone, Default)]
pub struct MemorySubscriberStore {
    inner: Arc<RwLock<Subscribers>>,
}

impl MemorySubscriberStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of subscribers, active or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every subscriber in id order
    #[must_use]
    pub fn all(&self) -> Vec<Subscriber> {
        self.inner.read().by_id.values().cloned().collect()
    }
}

#[async_trait]
impl SubscriberStore for MemorySubscriberStore {
    async fn find_by_email(&self, email: &EmailAddress) -> crate::Result<Option<Subscriber>> {
        let guard = self.inner.read();
        Ok(guard
            .by_email
            .get(email)
            .and_then(|id| guard.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, subscriber: NewSubscriber) -> crate::Result<Subscriber> {
        let mut guard = self.inner.write();

        if guard.by_email.contains_key(&subscriber.email) {
            return Err(StoreError::DuplicateKey(subscriber.email.to_string()));
        }

        guard.last_id += 1;
        let stored = Subscriber {
            id: SubscriberId(guard.last_id),
            email: subscriber.email,
            active: subscriber.active,
        };

        guard.by_email.insert(stored.email.clone(), stored.id);
        guard.by_id.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn save(&self, subscriber: &Subscriber) -> crate::Result<Subscriber> {
        let mut guard = self.inner.write();

        let existing = guard
            .by_id
            .get(&subscriber.id)
            .ok_or(StoreError::NotFound(subscriber.id))?;

        if existing.email != subscriber.email {
            if guard.by_email.contains_key(&subscriber.email) {
                return Err(StoreError::DuplicateKey(subscriber.email.to_string()));
            }
            let previous = existing.email.clone();
            guard.by_email.remove(&previous);
            guard.by_email.insert(subscriber.email.clone(), subscriber.id);
        }

        guard.by_id.insert(subscriber.id, subscriber.clone());

        Ok(subscriber.clone())
    }

    async fn count_active(&self) -> crate::Result<u64> {
        Ok(self.inner.read().by_id.values().filter(|s| s.active).count() as u64)
    }

    async fn find_active_page(&self, page: PageRequest) -> crate::Result<SubscriberPage> {
        let guard = self.inner.read();
        let start = page.after.map_or(Bound::Unbounded, Bound::Excluded);

        // One extra row tells us whether another page follows
        let mut records: Vec<Subscriber> = guard
            .by_id
            .range((start, Bound::Unbounded))
            .map(|(_, s)| s)
            .filter(|s| s.active)
            .take(page.size.saturating_add(1))
            .cloned()
            .collect();

        let has_next = records.len() > page.size;
        records.truncate(page.size);

        Ok(SubscriberPage { records, has_next })
    }
}

/// In-memory delivery log
///
/// `save_all` appends the whole slice under a single write guard, which is
/// all the atomicity an in-process log needs.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeliveryLog {
    pub(crate) records: Arc<RwLock<Vec<DeliveryLogRecord>>>,
}

impl MemoryDeliveryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record in insertion order
    #[must_use]
    pub fn records(&self) -> Vec<DeliveryLogRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryDeliveryLog {
    async fn save_all(&self, records: &[DeliveryLogRecord]) -> crate::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.records.write().extend_from_slice(records);
        Ok(())
    }

    async fn find_most_recent_issue_label(&self) -> crate::Result<Option<String>> {
        Ok(self
            .records
            .read()
            .iter()
            .max_by_key(|record| (record.sent_at, record.id))
            .map(|record| record.issue_label.clone()))
    }
}
