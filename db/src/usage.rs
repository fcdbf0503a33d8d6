use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::usage::{ReserveOutcome, UsageCounter, UsagePeriod};

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Creates the subscriber's usage period if none exists and returns the
    /// stored row either way. Never fails because a row already exists.
    async fn ensure(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<UsagePeriod>;

    async fn get(&self, subscriber_id: Uuid) -> Res<Option<UsagePeriod>>;

    /// Increments `counter` by one if it is below `limit` (`None` = unlimited),
    /// as a single atomic step.
    async fn try_reserve(
        &self,
        subscriber_id: Uuid,
        counter: UsageCounter,
        limit: Option<i32>,
    ) -> Res<ReserveOutcome>;

    /// Gives back one unit of `counter`, never going below zero.
    async fn release(&self, subscriber_id: Uuid, counter: UsageCounter)
    -> Res<Option<UsagePeriod>>;

    /// Zeroes the boost counter and moves the window, but only while the
    /// stored window still starts at `expected_start`. Returns `None` when it
    /// does not. Listings are untouched.
    async fn reset_period(
        &self,
        subscriber_id: Uuid,
        expected_start: DateTime<Utc>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>>;

    async fn set_plan(&self, subscriber_id: Uuid, plan_id: Uuid) -> Res<Option<UsagePeriod>>;
}

pub struct PgUsageStore {
    pool: Arc<PgPool>,
}

impl PgUsageStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn ensure(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<UsagePeriod> {
        sqlx::query(
            r#"
            INSERT INTO usage_periods (subscriber_id, plan_id, listings_created, boosts_used, period_start, period_end)
            VALUES ($1, $2, 0, 0, $3, $4)
            ON CONFLICT (subscriber_id) DO NOTHING
            "#,
        )
        .bind(subscriber_id)
        .bind(plan_id)
        .bind(period_start)
        .bind(period_end)
        .execute(&*self.pool)
        .await?;

        sqlx::query_as::<_, UsagePeriod>("SELECT * FROM usage_periods WHERE subscriber_id = $1")
            .bind(subscriber_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn get(&self, subscriber_id: Uuid) -> Res<Option<UsagePeriod>> {
        sqlx::query_as::<_, UsagePeriod>("SELECT * FROM usage_periods WHERE subscriber_id = $1")
            .bind(subscriber_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn try_reserve(
        &self,
        subscriber_id: Uuid,
        counter: UsageCounter,
        limit: Option<i32>,
    ) -> Res<ReserveOutcome> {
        let column = counter.column();
        let sql = format!(
            r#"
            UPDATE usage_periods SET {column} = {column} + 1
            WHERE subscriber_id = $1 AND ($2::INTEGER IS NULL OR {column} < $2)
            RETURNING *
            "#
        );
        let reserved = sqlx::query_as::<_, UsagePeriod>(&sql)
            .bind(subscriber_id)
            .bind(limit)
            .fetch_optional(&*self.pool)
            .await?;

        match reserved {
            Some(period) => Ok(ReserveOutcome::Reserved(period)),
            None => Ok(match self.get(subscriber_id).await? {
                Some(period) => ReserveOutcome::LimitReached(period),
                None => ReserveOutcome::Missing,
            }),
        }
    }

    async fn release(
        &self,
        subscriber_id: Uuid,
        counter: UsageCounter,
    ) -> Res<Option<UsagePeriod>> {
        let column = counter.column();
        let sql = format!(
            "UPDATE usage_periods SET {column} = GREATEST({column} - 1, 0) WHERE subscriber_id = $1 RETURNING *"
        );
        sqlx::query_as::<_, UsagePeriod>(&sql)
            .bind(subscriber_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn reset_period(
        &self,
        subscriber_id: Uuid,
        expected_start: DateTime<Utc>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        sqlx::query_as::<_, UsagePeriod>(
            r#"
            UPDATE usage_periods SET boosts_used = 0, period_start = $3, period_end = $4
            WHERE subscriber_id = $1 AND period_start = $2
            RETURNING *
            "#,
        )
        .bind(subscriber_id)
        .bind(expected_start)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn set_plan(&self, subscriber_id: Uuid, plan_id: Uuid) -> Res<Option<UsagePeriod>> {
        sqlx::query_as::<_, UsagePeriod>(
            "UPDATE usage_periods SET plan_id = $2 WHERE subscriber_id = $1 RETURNING *",
        )
        .bind(subscriber_id)
        .bind(plan_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }
}
