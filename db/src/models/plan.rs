use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use common::misc::add_months;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A stored text value that does not name a known variant.
#[derive(Error, Debug)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Purchasable tiers, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Premium,
    Business,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
            PlanTier::Business => "business",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for PlanTier {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "premium" => Ok(PlanTier::Premium),
            "business" => Ok(PlanTier::Business),
            _ => Err(ParseEnumError { kind: "plan tier", value }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }

    /// End of a billing period starting at `from`.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BillingInterval::Month => add_months(from, 1),
            BillingInterval::Year => add_months(from, 12),
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unrecognised stored intervals bill monthly.
impl From<String> for BillingInterval {
    fn from(value: String) -> Self {
        match value.as_str() {
            "year" => BillingInterval::Year,
            "month" => BillingInterval::Month,
            other => {
                log::warn!("Unknown billing interval '{}', treating as monthly", other);
                BillingInterval::Month
            }
        }
    }
}

/// Resource limits and feature flags granted by a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    /// Lifetime listing cap, `-1` for unlimited.
    pub max_listings: i32,
    /// Boosts per usage period, `-1` for unlimited.
    pub max_boosts: i32,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl PlanFeatures {
    pub const UNLIMITED: i32 = -1;

    pub fn listing_limit(&self) -> Option<i32> {
        (self.max_listings >= 0).then_some(self.max_listings)
    }

    pub fn boost_limit(&self) -> Option<i32> {
        (self.max_boosts >= 0).then_some(self.max_boosts)
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub tier: PlanTier,
    /// Price in minor currency units.
    pub price: i64,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub billing_interval: BillingInterval,
    #[sqlx(json)]
    pub features: PlanFeatures,
    pub active: bool,
    pub scheduled_activate_at: Option<DateTime<Utc>>,
    pub scheduled_deactivate_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_paid(&self) -> bool {
        self.price > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanStats {
    pub plan_id: Uuid,
    pub subscriber_count: i64,
    /// Recurring revenue per billing interval, in minor units.
    pub revenue: i64,
    pub currency: String,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn tiers_are_ordered() {
        assert!(PlanTier::Free < PlanTier::Basic);
        assert!(PlanTier::Basic < PlanTier::Premium);
        assert!(PlanTier::Premium < PlanTier::Business);
    }

    #[test]
    fn unknown_interval_bills_monthly() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let interval = BillingInterval::from("fortnight".to_string());
        assert_eq!(interval, BillingInterval::Month);
        assert_eq!(
            interval.advance(start),
            Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            BillingInterval::Year.advance(start),
            Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn negative_limits_are_unlimited() {
        let features = PlanFeatures {
            max_listings: PlanFeatures::UNLIMITED,
            max_boosts: 2,
            flags: BTreeMap::from([("analytics".to_string(), true)]),
        };
        assert_eq!(features.listing_limit(), None);
        assert_eq!(features.boost_limit(), Some(2));
        assert!(features.has("analytics"));
        assert!(!features.has("verified_badge"));
    }

    #[test]
    fn features_survive_json() {
        let features = PlanFeatures {
            max_listings: 5,
            max_boosts: -1,
            flags: BTreeMap::from([
                ("analytics".to_string(), true),
                ("priority_support".to_string(), false),
            ]),
        };
        let json = serde_json::to_string(&features).unwrap();
        let back: PlanFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back, features);
        assert!(PlanTier::try_from("platinum".to_string()).is_err());
    }
}
