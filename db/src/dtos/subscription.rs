use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct SubscriptionCreateRequest {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method_id: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}
