//! Command-line utility for managing a gazette installation
//!
//! Works directly against the configured store:
//! - Subscribing and unsubscribing addresses
//! - Listing issues in publishing order and previewing the next one
//! - Running one distribution in-process

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gazette::Gazette;
use gazette_common::logging;
use gazette_delivery::{LoggingTransport, SubscriptionManager};
use gazette_store::{DeliveryLogStore, StoreConfig};

/// Command-line utility for managing gazette
#[derive(Parser, Debug)]
#[command(name = "gazettectl")]
#[command(about = "Manage gazette subscribers and issues", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file, instead of the usual lookup
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Subscribe an address, or reactivate it
    Subscribe {
        email: String,
    },
    /// Unsubscribe an address
    Unsubscribe {
        email: String,
    },
    /// Show which issue would be published next, without sending it
    NextIssue,
    /// List available issues in publishing order
    Issues,
    /// Send the next issue to every active subscriber now
    ///
    /// Uses the log-only transport.
    DistributeNext,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = gazette::find_config_file(cli.config.as_deref())?;
    let gazette = gazette::load_config(&config_path)?;

    if gazette.store == StoreConfig::Memory {
        eprintln!("Warning: the configured store is in-memory, changes will not persist");
    }

    match cli.command {
        Commands::Subscribe { email } => cmd_subscribe(&gazette, &email).await?,
        Commands::Unsubscribe { email } => cmd_unsubscribe(&gazette, &email).await?,
        Commands::NextIssue => cmd_next_issue(&gazette).await?,
        Commands::Issues => cmd_issues(&gazette).await?,
        Commands::DistributeNext => {
            logging::init();
            cmd_distribute_next(&gazette).await?;
        }
    }

    Ok(())
}

async fn cmd_subscribe(gazette: &Gazette, email: &str) -> anyhow::Result<()> {
    let stores = gazette.open_stores()?;
    let subscription = SubscriptionManager::new(stores.subscribers)
        .subscribe_str(email)
        .await?;

    println!(
        "{} ({}): {}",
        subscription.subscriber.email,
        subscription.subscriber.id,
        subscription.outcome.as_str()
    );
    Ok(())
}

async fn cmd_unsubscribe(gazette: &Gazette, email: &str) -> anyhow::Result<()> {
    let stores = gazette.open_stores()?;
    let changed = SubscriptionManager::new(stores.subscribers)
        .unsubscribe_str(email)
        .await?;

    if changed {
        println!("{email}: unsubscribed");
    } else {
        println!("{email}: not subscribed");
    }
    Ok(())
}

async fn cmd_next_issue(gazette: &Gazette) -> anyhow::Result<()> {
    let stores = gazette.open_stores()?;
    match gazette.sequencer(&stores).next_issue().await? {
        Some(issue) => {
            println!("Next issue: {}", issue.label);
            println!("{}", "-".repeat(40));
            println!("{}", issue.content);
        }
        None => println!("Every available issue has been sent"),
    }
    Ok(())
}

async fn cmd_issues(gazette: &Gazette) -> anyhow::Result<()> {
    let stores = gazette.open_stores()?;
    let labels = gazette.sequencer(&stores).load_available_issues().await?;
    let last = stores.delivery_log.find_most_recent_issue_label().await?;

    println!("{:<4} {:<32}", "", "ISSUE");
    println!("{}", "-".repeat(37));
    for label in &labels {
        let marker = if last.as_deref() == Some(label.as_str()) {
            "*"
        } else {
            ""
        };
        println!("{marker:<4} {label:<32}");
    }

    println!("\nTotal: {} issue(s)", labels.len());
    if last.is_some() {
        println!("* most recently sent");
    }
    Ok(())
}

async fn cmd_distribute_next(gazette: &Gazette) -> anyhow::Result<()> {
    let stores = gazette.open_stores()?;
    let Some(issue) = gazette.sequencer(&stores).next_issue().await? else {
        println!("Every available issue has been sent");
        return Ok(());
    };

    let summary = gazette
        .engine(&stores, std::sync::Arc::new(LoggingTransport))
        .distribute(&issue)
        .await?;

    println!("{summary}");
    Ok(())
}
