//! End-to-end test of the controller: schedule, publish, distribute, log
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use gazette::Gazette;
use gazette_api::ApiConfig;
use gazette_delivery::{IssuesConfig, Schedule, SubscriptionManager};
use gazette_store::{DeliveryLogStore, SqliteStore, StoreConfig, SubscriberStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduled_issue_reaches_the_delivery_log() {
    let dir = tempfile::tempdir().unwrap();
    let issues = dir.path().join("newsletters");
    std::fs::create_dir(&issues).unwrap();
    for (label, body) in [("n1.md", "# One"), ("n2.md", "# Two"), ("n10.md", "# Ten")] {
        std::fs::write(issues.join(label), body).unwrap();
    }
    let database = dir.path().join("gazette.db");

    let config = Gazette {
        store: StoreConfig::Sqlite {
            path: database.clone(),
        },
        issues: IssuesConfig {
            directory: issues,
            ..IssuesConfig::default()
        },
        schedule: Schedule::Interval { secs: 1 },
        api: ApiConfig {
            enabled: false,
            ..ApiConfig::default()
        },
        ..Gazette::default()
    };

    // A second connection to the same database, as gazettectl would use
    let store = SqliteStore::open(&database).unwrap();
    let manager = SubscriptionManager::new(std::sync::Arc::new(store.clone()));
    for email in ["ann@example.com", "bob@example.com", "cy@example.com"] {
        manager.subscribe_str(email).await.unwrap();
    }

    let watcher = store.clone();
    let stop = async move {
        while watcher.find_most_recent_issue_label().await?.as_deref() != Some("n1.md") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok::<(), anyhow::Error>(())
    };

    tokio::time::timeout(Duration::from_secs(10), config.clone().run_until(stop))
        .await
        .expect("First issue was never distributed")
        .unwrap();

    assert_eq!(store.count_active().await.unwrap(), 3);

    let stores = config.open_stores().unwrap();
    let next = config.sequencer(&stores).next_issue().await.unwrap().unwrap();
    assert_eq!(next.label, "n2.md");
    assert_eq!(&*next.content, "# Two");
}
