//! Idempotent subscribe/unsubscribe over a [`SubscriberStore`]

use std::sync::Arc;

use gazette_common::{EmailAddress, NewSubscriber, Subscriber, incoming};
use gazette_store::SubscriberStore;

use crate::error::SubscriptionError;

/// What a subscribe call did to the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscriber was created
    Created,
    /// An inactive subscriber was switched back on
    Reactivated,
    /// The subscriber was already active; nothing was written
    Unchanged,
    /// Another caller created the subscriber first; its record was returned
    Joined,
}

impl SubscribeOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Reactivated => "reactivated",
            Self::Unchanged => "unchanged",
            Self::Joined => "joined",
        }
    }
}

/// Result of [`SubscriptionManager::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub subscriber: Subscriber,
    pub outcome: SubscribeOutcome,
}

/// Manages the active/inactive lifecycle of subscribers
///
/// Holds no locks of its own. Concurrent subscribes for one address are
/// resolved by the store's unique email constraint: the loser re-reads the
/// winner's record.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn SubscriberStore>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn SubscriberStore>) -> Self {
        Self { store }
    }

    /// Validate `email` and subscribe it
    ///
    /// # Errors
    /// [`SubscriptionError::InvalidEmail`] if `email` is blank or malformed,
    /// otherwise as [`subscribe`](Self::subscribe)
    pub async fn subscribe_str(&self, email: &str) -> Result<Subscription, SubscriptionError> {
        let email = EmailAddress::parse(email).inspect_err(|_| record_rejected("subscribe"))?;
        self.subscribe(email).await
    }

    /// Make `email` an active subscriber
    ///
    /// Active subscribers are returned untouched, inactive ones are
    /// reactivated, and unknown addresses are created.
    ///
    /// # Errors
    /// [`SubscriptionError::InvariantViolation`] if a create was rejected as a
    /// duplicate and the existing record still cannot be found, or
    /// [`SubscriptionError::Store`] on any other store failure
    #[tracing::instrument(level = "debug", skip_all, fields(email = %email))]
    pub async fn subscribe(&self, email: EmailAddress) -> Result<Subscription, SubscriptionError> {
        incoming!("Subscribe request for {email}");

        let result = self.subscribe_inner(email).await;
        match &result {
            Ok(subscription) => {
                tracing::info!(
                    subscriber = %subscription.subscriber.id,
                    outcome = subscription.outcome.as_str(),
                    "Subscribed"
                );
                if let Some(metrics) = gazette_metrics::metrics() {
                    metrics
                        .subscription
                        .record_subscribed(subscription.outcome.as_str());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Subscribe failed");
                if let Some(metrics) = gazette_metrics::metrics() {
                    metrics.subscription.record_error("subscribe");
                }
            }
        }

        result
    }

    async fn subscribe_inner(
        &self,
        email: EmailAddress,
    ) -> Result<Subscription, SubscriptionError> {
        if let Some(mut subscriber) = self.store.find_by_email(&email).await? {
            if subscriber.active {
                return Ok(Subscription {
                    subscriber,
                    outcome: SubscribeOutcome::Unchanged,
                });
            }

            subscriber.activate();
            let subscriber = self.store.save(&subscriber).await?;
            return Ok(Subscription {
                subscriber,
                outcome: SubscribeOutcome::Reactivated,
            });
        }

        match self.store.insert(NewSubscriber::new(email.clone())).await {
            Ok(subscriber) => Ok(Subscription {
                subscriber,
                outcome: SubscribeOutcome::Created,
            }),
            Err(e) if e.is_duplicate_key() => {
                tracing::debug!("Lost the create race, reading the winner's record");

                let subscriber = self.store.find_by_email(&email).await?.ok_or_else(|| {
                    SubscriptionError::InvariantViolation {
                        email: email.to_string(),
                    }
                })?;

                Ok(Subscription {
                    subscriber,
                    outcome: SubscribeOutcome::Joined,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate `email` and unsubscribe it
    ///
    /// # Errors
    /// [`SubscriptionError::InvalidEmail`] if `email` is blank or malformed,
    /// otherwise as [`unsubscribe`](Self::unsubscribe)
    pub async fn unsubscribe_str(&self, email: &str) -> Result<bool, SubscriptionError> {
        let email = EmailAddress::parse(email).inspect_err(|_| record_rejected("unsubscribe"))?;
        self.unsubscribe(email).await
    }

    /// Deactivate `email` if it is an active subscriber
    ///
    /// Unknown and already inactive addresses are left alone. Returns
    /// whether anything changed.
    ///
    /// # Errors
    /// [`SubscriptionError::Store`] if the store fails
    #[tracing::instrument(level = "debug", skip_all, fields(email = %email))]
    pub async fn unsubscribe(&self, email: EmailAddress) -> Result<bool, SubscriptionError> {
        incoming!("Unsubscribe request for {email}");

        let result = self.unsubscribe_inner(&email).await;

        let metrics = gazette_metrics::metrics();
        match &result {
            Ok(changed) => {
                let outcome = if *changed { "deactivated" } else { "unchanged" };
                tracing::info!(outcome, "Unsubscribed");
                if let Some(metrics) = metrics {
                    metrics.subscription.record_unsubscribed(outcome);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Unsubscribe failed");
                if let Some(metrics) = metrics {
                    metrics.subscription.record_error("unsubscribe");
                }
            }
        }

        result
    }

    async fn unsubscribe_inner(&self, email: &EmailAddress) -> Result<bool, SubscriptionError> {
        match self.store.find_by_email(email).await? {
            Some(mut subscriber) if subscriber.active => {
                subscriber.deactivate();
                self.store.save(&subscriber).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn record_rejected(operation: &'static str) {
    if let Some(metrics) = gazette_metrics::metrics() {
        metrics.subscription.record_rejected(operation);
    }
}
