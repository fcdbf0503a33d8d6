use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    /// Never reset; counts against a lifetime cap.
    pub listings_created: i32,
    /// Reset by the monthly sweep.
    pub boosts_used: i32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl UsagePeriod {
    pub fn value(&self, counter: UsageCounter) -> i32 {
        match counter {
            UsageCounter::Listings => self.listings_created,
            UsageCounter::Boosts => self.boosts_used,
        }
    }
}

/// The two quota counters kept per subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageCounter {
    Listings,
    Boosts,
}

impl UsageCounter {
    pub fn column(&self) -> &'static str {
        match self {
            UsageCounter::Listings => "listings_created",
            UsageCounter::Boosts => "boosts_used",
        }
    }

    pub fn resource(&self) -> &'static str {
        match self {
            UsageCounter::Listings => "listing",
            UsageCounter::Boosts => "boost",
        }
    }
}

/// Result of an atomic "increment if below limit".
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(UsagePeriod),
    LimitReached(UsagePeriod),
    /// No usage period exists for the subscriber.
    Missing,
}
