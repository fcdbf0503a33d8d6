use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct ListingCreateRequest {
    pub subscriber_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}
