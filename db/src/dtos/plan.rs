use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::plan::{BillingInterval, PlanFeatures, PlanTier};

#[derive(Debug, Clone, Deserialize)]
pub struct PlanCreateRequest {
    pub name: String,
    pub tier: PlanTier,
    pub price: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub features: PlanFeatures,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial plan update. `None` leaves a field untouched.
///
/// The schedule fields are written by the catalog's scheduling operations and
/// by the plan sweep; they are not accepted from request bodies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdateRequest {
    pub name: Option<String>,
    pub tier: Option<PlanTier>,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub billing_interval: Option<BillingInterval>,
    pub features: Option<PlanFeatures>,
    pub active: Option<bool>,
    #[serde(skip)]
    pub scheduled_activate_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip)]
    pub scheduled_deactivate_at: Option<Option<DateTime<Utc>>>,
}
