use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The slice of a directory listing the entitlement engine cares about.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub title: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}
