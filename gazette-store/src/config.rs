use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{MemoryDeliveryLog, MemorySubscriberStore, SqliteStore},
    store::{DeliveryLogStore, SubscriberStore},
};

/// Configuration for the subscriber and delivery-log stores
///
/// # Examples
///
/// SQLite database in RON config:
/// ```ron
/// Gazette (
///     store: Sqlite(
///         path: "/var/lib/gazette/gazette.db",
///     ),
/// )
/// ```
///
/// In-memory stores for development:
/// ```ron
/// Gazette (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreConfig {
    /// Durable SQLite database
    Sqlite {
        #[serde(default = "default_database_path")]
        path: PathBuf,
    },
    /// In-process stores, lost on exit
    Memory,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gazette.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_database_path(),
        }
    }
}

/// Both stores, ready to be shared across tasks
#[derive(Debug, Clone)]
pub struct Stores {
    pub subscribers: Arc<dyn SubscriberStore>,
    pub delivery_log: Arc<dyn DeliveryLogStore>,
}

impl StoreConfig {
    /// Database path for SQLite stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Sqlite { path } => Some(path),
            Self::Memory => None,
        }
    }

    /// Open the configured backend
    ///
    /// A single SQLite connection backs both stores.
    ///
    /// # Errors
    /// If the database cannot be opened or migrated
    pub fn open(&self) -> crate::Result<Stores> {
        match self {
            Self::Sqlite { path } => {
                let store = SqliteStore::open(path)?;
                Ok(Stores {
                    subscribers: Arc::new(store.clone()),
                    delivery_log: Arc::new(store),
                })
            }
            Self::Memory => {
                tracing::warn!("Using in-memory stores, nothing will survive a restart");
                Ok(Stores {
                    subscribers: Arc::new(MemorySubscriberStore::new()),
                    delivery_log: Arc::new(MemoryDeliveryLog::new()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sqlite() {
        assert_eq!(
            StoreConfig::default().path(),
            Some(std::path::Path::new("gazette.db"))
        );
    }

    #[tokio::test]
    async fn test_memory_stores_open() {
        let stores = StoreConfig::Memory.open().unwrap();
        assert_eq!(stores.subscribers.count_active().await.unwrap(), 0);
        assert_eq!(
            stores.delivery_log.find_most_recent_issue_label().await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_sqlite_stores_share_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Sqlite {
            path: dir.path().join("gazette.db"),
        };

        let stores = config.open().unwrap();
        assert!(dir.path().join("gazette.db").exists());
        assert_eq!(stores.subscribers.count_active().await.unwrap(), 0);
    }
}
