//! SQLite-backed subscriber and delivery-log storage
//!
//! One connection serves both tables. Calls run on the blocking pool so the
//! async callers never wait on disk I/O directly.
//!
//! The schema version is tracked with `PRAGMA user_version`; every pending
//! migration is applied in a single transaction when the store is opened.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gazette_common::{
    DeliveryLogRecord, EmailAddress, NewSubscriber, Subscriber, SubscriberId,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    StoreError,
    store::{DeliveryLogStore, PageRequest, SubscriberPage, SubscriberStore},
};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/0001_subscribers.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/0002_delivery_log.sql"),
    },
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version this binary can read and write
#[must_use]
pub fn latest_schema_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

fn current_schema_version(conn: &Connection) -> crate::Result<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

fn apply_migrations(conn: &mut Connection) -> crate::Result<()> {
    let current = current_schema_version(conn)?;
    let latest = latest_schema_version();

    if current > latest {
        return Err(StoreError::UnsupportedSchema {
            found: current,
            supported: latest,
        });
    }

    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        tracing::debug!(version = migration.version, "Applied schema migration");
    }
    tx.commit()?;

    Ok(())
}

fn bootstrap(conn: &mut Connection) -> crate::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    apply_migrations(conn)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn subscriber_from_row(id: i64, email: &str, active: bool) -> crate::Result<Subscriber> {
    let email = EmailAddress::parse(email)
        .map_err(|e| StoreError::InvalidData(format!("subscriber {id}: {e}")))?;

    Ok(Subscriber {
        id: SubscriberId(id),
        email,
        active,
    })
}

/// SQLite store implementing both [`SubscriberStore`] and [`DeliveryLogStore`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bring its schema up to date
    ///
    /// # Errors
    /// If the file cannot be opened, or migrations fail, or the file was
    /// written by a newer schema
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let started = Instant::now();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "Unable to create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let mut conn = Connection::open(path)?;
        if let Err(err) = bootstrap(&mut conn) {
            tracing::error!(path = %path.display(), error = %err, "Failed to open store");
            return Err(err);
        }

        tracing::info!(
            path = %path.display(),
            duration_ms = started.elapsed().as_millis(),
            schema = latest_schema_version(),
            "Opened store"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    /// If SQLite fails to allocate the database or apply migrations
    pub fn open_in_memory() -> crate::Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        bootstrap(&mut conn)?;

        tracing::debug!("Opened in-memory store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file backing this store, `None` when in memory
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current `user_version` of the open database
    ///
    /// # Errors
    /// If the pragma cannot be read
    pub async fn schema_version(&self) -> crate::Result<u32> {
        self.with_connection(|conn| current_schema_version(conn)).await
    }

    async fn with_connection<T, F>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce(&mut Connection) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl SubscriberStore for SqliteStore {
    async fn find_by_email(&self, email: &EmailAddress) -> crate::Result<Option<Subscriber>> {
        let email = email.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, email, active FROM subscribers WHERE email = ?1",
                    params![email],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, bool>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, email, active)| subscriber_from_row(id, &email, active))
                .transpose()
        })
        .await
    }

    async fn insert(&self, subscriber: NewSubscriber) -> crate::Result<Subscriber> {
        self.with_connection(move |conn| {
            match conn.execute(
                "INSERT INTO subscribers (email, active) VALUES (?1, ?2)",
                params![subscriber.email.as_str(), subscriber.active],
            ) {
                Ok(_) => Ok(Subscriber {
                    id: SubscriberId(conn.last_insert_rowid()),
                    email: subscriber.email,
                    active: subscriber.active,
                }),
                Err(e) if is_unique_violation(&e) => {
                    Err(StoreError::DuplicateKey(subscriber.email.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn save(&self, subscriber: &Subscriber) -> crate::Result<Subscriber> {
        let subscriber = subscriber.clone();
        self.with_connection(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE subscribers SET email = ?2, active = ?3 WHERE id = ?1",
                    params![subscriber.id.0, subscriber.email.as_str(), subscriber.active],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::DuplicateKey(subscriber.email.to_string())
                    } else {
                        e.into()
                    }
                })?;

            if updated == 0 {
                return Err(StoreError::NotFound(subscriber.id));
            }

            Ok(subscriber)
        })
        .await
    }

    async fn count_active(&self) -> crate::Result<u64> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM subscribers WHERE active = 1",
                [],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn find_active_page(&self, page: PageRequest) -> crate::Result<SubscriberPage> {
        let limit = i64::try_from(page.size.saturating_add(1)).unwrap_or(i64::MAX);
        let after = page.after.map_or(0, |id| id.0);

        self.with_connection(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, email, active FROM subscribers
                 WHERE active = 1 AND id > ?2
                 ORDER BY id ASC
                 LIMIT ?1",
            )?;

            let rows = stmt
                .query_map(params![limit, after], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut records = rows
                .into_iter()
                .map(|(id, email, active)| subscriber_from_row(id, &email, active))
                .collect::<crate::Result<Vec<_>>>()?;

            let has_next = records.len() > page.size;
            records.truncate(page.size);

            Ok(SubscriberPage { records, has_next })
        })
        .await
    }
}

#[async_trait]
impl DeliveryLogStore for SqliteStore {
    async fn save_all(&self, records: &[DeliveryLogRecord]) -> crate::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let records = records.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO delivery_log
                        (id, subscriber_id, issue_label, content, sent_at, outcome)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;

                for record in &records {
                    stmt.execute(params![
                        record.id.to_string(),
                        record.subscriber_id.0,
                        record.issue_label,
                        record.content.as_ref(),
                        format_timestamp(&record.sent_at),
                        record.outcome.as_str(),
                    ])?;
                }
            }
            tx.commit()?;

            tracing::trace!(count = records.len(), "Persisted delivery records");
            Ok(())
        })
        .await
    }

    async fn find_most_recent_issue_label(&self) -> crate::Result<Option<String>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT issue_label FROM delivery_log ORDER BY sent_at DESC, id DESC LIMIT 1",
                    [],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use gazette_common::{DeliveryOutcome, Issue};

    use super::*;

    fn email(value: &str) -> EmailAddress {
        EmailAddress::parse(value).expect("valid test address")
    }

    fn record(subscriber: &Subscriber, label: &str, sent_at: DateTime<Utc>) -> DeliveryLogRecord {
        let mut record =
            DeliveryLogRecord::new(subscriber, &Issue::new(label, "body"), DeliveryOutcome::Success);
        record.sent_at = sent_at;
        record
    }

    #[tokio::test]
    async fn test_migrations_reach_latest_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().await.unwrap(), latest_schema_version());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }

        let err = SqliteStore::open(&path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchema { found: 99, .. }
        ));
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gazette.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert(NewSubscriber::new(email("a@example.com"))).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let found = store.find_by_email(&email("a@example.com")).await.unwrap();
        assert!(found.is_some_and(|s| s.active));
    }

    #[tokio::test]
    async fn test_duplicate_insert_maps_to_duplicate_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(NewSubscriber::new(email("a@example.com"))).await.unwrap();

        let err = store
            .insert(NewSubscriber::new(email("a@example.com")))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_save_updates_and_reports_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut subscriber = store
            .insert(NewSubscriber::new(email("a@example.com")))
            .await
            .unwrap();

        subscriber.deactivate();
        store.save(&subscriber).await.unwrap();
        assert_eq!(store.count_active().await.unwrap(), 0);

        let ghost = Subscriber {
            id: SubscriberId(999),
            email: email("ghost@example.com"),
            active: true,
        };
        assert!(matches!(
            store.save(&ghost).await,
            Err(StoreError::NotFound(SubscriberId(999)))
        ));
    }

    #[tokio::test]
    async fn test_active_pages_in_id_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..7 {
            let mut s = store
                .insert(NewSubscriber::new(email(&format!("user{i}@example.com"))))
                .await
                .unwrap();
            if i % 3 == 0 {
                s.deactivate();
                store.save(&s).await.unwrap();
            }
        }

        // users 1, 2, 4, 5 remain active
        let request = PageRequest::first(3);
        let first = store.find_active_page(request).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.has_next);
        assert!(first.records.windows(2).all(|w| w[0].id < w[1].id));

        let second = store
            .find_active_page(request.next(&first))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert!(!second.has_next);
        assert_eq!(second.records[0].email.as_str(), "user5@example.com");
    }

    #[tokio::test]
    async fn test_delivery_log_round_trip_and_latest_label() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.find_most_recent_issue_label().await.unwrap(), None);

        let subscriber = store
            .insert(NewSubscriber::new(email("a@example.com")))
            .await
            .unwrap();

        let now = Utc::now();
        store
            .save_all(&[
                record(&subscriber, "n2.md", now),
                record(&subscriber, "n1.md", now - ChronoDuration::days(1)),
            ])
            .await
            .unwrap();

        assert_eq!(
            store.find_most_recent_issue_label().await.unwrap().as_deref(),
            Some("n2.md")
        );
    }

    #[tokio::test]
    async fn test_save_all_is_atomic() {
        let store = SqliteStore::open_in_memory().unwrap();
        let subscriber = store
            .insert(NewSubscriber::new(email("a@example.com")))
            .await
            .unwrap();

        let first = record(&subscriber, "n1.md", Utc::now());
        store.save_all(std::slice::from_ref(&first)).await.unwrap();

        // Reusing a primary key fails the whole batch
        let fresh = record(&subscriber, "n2.md", Utc::now());
        let err = store.save_all(&[fresh, first]).await;
        assert!(err.is_err());

        assert_eq!(
            store.find_most_recent_issue_label().await.unwrap().as_deref(),
            Some("n1.md")
        );
    }
}
