use db::models::subscription::Subscription;
use downgrade::DowngradeReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAutoRenewRequest {
    pub auto_renew: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: Uuid,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanChangeResponse {
    pub subscription: Subscription,
    pub downgrade: DowngradeReport,
}

/// What the renewal sweep did with one due subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed(Subscription),
    Cancelled(Subscription),
    Expired(Subscription),
    /// Not due, or another worker got there first.
    Skipped,
}
