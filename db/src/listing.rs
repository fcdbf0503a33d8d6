use std::sync::Arc;

use async_trait::async_trait;
use common::error::{AppError, Res};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{dtos::listing::ListingCreateRequest, models::listing::Listing};

/// Access to the listing subsystem.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn create(&self, data: ListingCreateRequest) -> Res<Listing>;

    async fn get(&self, id: Uuid) -> Res<Option<Listing>>;

    /// Public listings of a subscriber, oldest first: ascending `created_at`,
    /// ties broken by ascending `id`.
    async fn list_public_oldest_first(&self, subscriber_id: Uuid) -> Res<Vec<Listing>>;

    /// Hides a listing. The listing is kept, only its visibility changes.
    async fn deactivate(&self, id: Uuid) -> Res<()>;
}

pub struct PgListingStore {
    pool: Arc<PgPool>,
}

impl PgListingStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn create(&self, data: ListingCreateRequest) -> Res<Listing> {
        sqlx::query_as::<_, Listing>(
            r#"
            INSERT INTO listings (id, subscriber_id, title, is_public, created_at)
            VALUES ($1, $2, $3, TRUE, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.subscriber_id)
        .bind(data.title)
        .bind(data.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Listing>> {
        sqlx::query_as::<_, Listing>("SELECT * FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn list_public_oldest_first(&self, subscriber_id: Uuid) -> Res<Vec<Listing>> {
        sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM listings
            WHERE subscriber_id = $1 AND is_public
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(subscriber_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn deactivate(&self, id: Uuid) -> Res<()> {
        sqlx::query("UPDATE listings SET is_public = FALSE WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}
