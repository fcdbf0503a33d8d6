use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct BoostCreateRequest {
    pub listing_id: Uuid,
    pub subscriber_id: Uuid,
    pub duration_days: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}
