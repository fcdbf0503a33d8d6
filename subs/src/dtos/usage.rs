use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub listings_created: i32,
    /// `None` when unlimited.
    pub max_listings: Option<i32>,
    pub listings_remaining: Option<i32>,
    pub boosts_used: i32,
    pub max_boosts: Option<i32>,
    pub boosts_remaining: Option<i32>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListingDraft {
    pub title: String,
}
