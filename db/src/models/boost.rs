use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostStatus {
    Active,
    Expired,
}

impl BoostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoostStatus::Active => "active",
            BoostStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for BoostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for BoostStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(BoostStatus::Active),
            "expired" => Ok(BoostStatus::Expired),
            _ => Err(ParseEnumError {
                kind: "boost status",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Boost {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub subscriber_id: Uuid,
    pub duration_days: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: BoostStatus,
    pub impressions: i64,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
}

impl Boost {
    /// Active and not yet past its end date.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == BoostStatus::Active && self.end_date >= now
    }

    /// Still flagged active although its end date has passed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BoostStatus::Active && self.end_date < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostMetric {
    Impression,
    Click,
}

impl BoostMetric {
    pub fn column(&self) -> &'static str {
        match self {
            BoostMetric::Impression => "impressions",
            BoostMetric::Click => "clicks",
        }
    }
}
