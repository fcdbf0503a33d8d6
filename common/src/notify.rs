use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Res;

/// Messages handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    RenewalReminder {
        subscriber_id: Uuid,
        plan_id: Uuid,
        renews_at: DateTime<Utc>,
    },
    SubscriptionRenewed {
        subscriber_id: Uuid,
        period_end: DateTime<Utc>,
    },
    SubscriptionLapsed {
        subscriber_id: Uuid,
        reason: String,
    },
    CancellationConfirmed {
        subscriber_id: Uuid,
        immediate: bool,
    },
    LimitReached {
        subscriber_id: Uuid,
        resource: &'static str,
        limit: i32,
    },
    ListingsDisabled {
        subscriber_id: Uuid,
        count: usize,
    },
}

impl Notification {
    pub fn subscriber_id(&self) -> Uuid {
        match self {
            Notification::RenewalReminder { subscriber_id, .. }
            | Notification::SubscriptionRenewed { subscriber_id, .. }
            | Notification::SubscriptionLapsed { subscriber_id, .. }
            | Notification::CancellationConfirmed { subscriber_id, .. }
            | Notification::LimitReached { subscriber_id, .. }
            | Notification::ListingsDisabled { subscriber_id, .. } => *subscriber_id,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::RenewalReminder { renews_at, .. } => {
                write!(f, "subscription renews at {}", renews_at)
            }
            Notification::SubscriptionRenewed { period_end, .. } => {
                write!(f, "subscription renewed until {}", period_end)
            }
            Notification::SubscriptionLapsed { reason, .. } => {
                write!(f, "subscription lapsed: {}", reason)
            }
            Notification::CancellationConfirmed { immediate, .. } => {
                if *immediate {
                    write!(f, "subscription cancelled")
                } else {
                    write!(f, "subscription will cancel at period end")
                }
            }
            Notification::LimitReached {
                resource, limit, ..
            } => write!(f, "{} limit of {} reached", resource, limit),
            Notification::ListingsDisabled { count, .. } => {
                write!(f, "{} listings hidden after plan change", count)
            }
        }
    }
}

/// Delivery channel for subscriber-facing messages (email, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Res<()>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Res<()> {
        log::info!(
            "Notify subscriber {}: {}",
            notification.subscriber_id(),
            notification
        );
        Ok(())
    }
}

/// Fire-and-forget delivery. Failures are logged and never reach the caller.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let subscriber_id = notification.subscriber_id();
        if let Err(e) = notifier.send(notification).await {
            log::warn!("Notification to {} failed: {}", subscriber_id, e);
        }
    });
}
