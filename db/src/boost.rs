use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::boost::BoostCreateRequest,
    models::boost::{Boost, BoostMetric},
};

#[async_trait]
pub trait BoostStore: Send + Sync {
    /// Inserts an active boost unless the listing already has a live one.
    /// Boosts on the same listing that are flagged active but already past
    /// their end date are expired as part of the same step.
    async fn insert_active(&self, data: BoostCreateRequest, now: DateTime<Utc>)
    -> Res<Option<Boost>>;

    async fn get(&self, id: Uuid) -> Res<Option<Boost>>;

    /// Marks a boost expired. Returns the stored boost, expired or not, or
    /// `None` if it does not exist.
    async fn expire(&self, id: Uuid) -> Res<Option<Boost>>;

    async fn find_live_for_listing(&self, listing_id: Uuid, now: DateTime<Utc>)
    -> Res<Option<Boost>>;

    async fn list_live_for_subscriber(
        &self,
        subscriber_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Vec<Boost>>;

    /// Boosts still flagged active whose end date is before `now`.
    async fn list_lapsed(&self, now: DateTime<Utc>) -> Res<Vec<Boost>>;

    async fn record(&self, id: Uuid, metric: BoostMetric) -> Res<Option<Boost>>;
}

pub struct PgBoostStore {
    pool: Arc<PgPool>,
}

impl PgBoostStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BoostStore for PgBoostStore {
    async fn insert_active(
        &self,
        data: BoostCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Boost>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE boosts SET status = 'expired'
            WHERE listing_id = $1 AND status = 'active' AND end_date < $2
            "#,
        )
        .bind(data.listing_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let boost = sqlx::query_as::<_, Boost>(
            r#"
            INSERT INTO boosts (id, listing_id, subscriber_id, duration_days, start_date, end_date,
                status, impressions, clicks, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'active', 0, 0, $7)
            ON CONFLICT (listing_id) WHERE status = 'active' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.listing_id)
        .bind(data.subscriber_id)
        .bind(data.duration_days)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(boost)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Boost>> {
        sqlx::query_as::<_, Boost>("SELECT * FROM boosts WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn expire(&self, id: Uuid) -> Res<Option<Boost>> {
        let expired = sqlx::query_as::<_, Boost>(
            "UPDATE boosts SET status = 'expired' WHERE id = $1 AND status = 'active' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        match expired {
            Some(boost) => Ok(Some(boost)),
            None => self.get(id).await,
        }
    }

    async fn find_live_for_listing(
        &self,
        listing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<Boost>> {
        sqlx::query_as::<_, Boost>(
            "SELECT * FROM boosts WHERE listing_id = $1 AND status = 'active' AND end_date >= $2",
        )
        .bind(listing_id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn list_live_for_subscriber(
        &self,
        subscriber_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Vec<Boost>> {
        sqlx::query_as::<_, Boost>(
            r#"
            SELECT * FROM boosts
            WHERE subscriber_id = $1 AND status = 'active' AND end_date >= $2
            ORDER BY end_date
            "#,
        )
        .bind(subscriber_id)
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn list_lapsed(&self, now: DateTime<Utc>) -> Res<Vec<Boost>> {
        sqlx::query_as::<_, Boost>(
            "SELECT * FROM boosts WHERE status = 'active' AND end_date < $1 ORDER BY end_date",
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn record(&self, id: Uuid, metric: BoostMetric) -> Res<Option<Boost>> {
        let column = metric.column();
        let sql = format!("UPDATE boosts SET {column} = {column} + 1 WHERE id = $1 RETURNING *");
        sqlx::query_as::<_, Boost>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }
}
