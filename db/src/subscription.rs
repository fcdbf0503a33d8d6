use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    dtos::subscription::SubscriptionCreateRequest,
    models::subscription::{Subscription, SubscriptionStatus},
};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts an active subscription. Returns `None` when the subscriber
    /// already holds an active one; the check and the insert are atomic.
    async fn insert_active(
        &self,
        data: SubscriptionCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>>;

    async fn get(&self, id: Uuid) -> Res<Option<Subscription>>;

    async fn get_active(&self, subscriber_id: Uuid) -> Res<Option<Subscription>>;

    /// Moves a subscription from `from` to `to`. `None` if it was not in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>>;

    /// Only applies to active subscriptions.
    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>>;

    /// Starts the next period, provided the current one still ends at
    /// `expected_end`. A second renewal of the same period is a no-op.
    async fn extend_period(
        &self,
        id: Uuid,
        expected_end: DateTime<Utc>,
        new_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>>;

    /// Rebinds an active subscription to another plan. A `None` payment method
    /// keeps the stored one.
    async fn change_plan(
        &self,
        id: Uuid,
        plan_id: Uuid,
        payment_method_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>>;

    /// Active subscriptions whose period ended at or before `now`.
    async fn list_due(&self, now: DateTime<Utc>) -> Res<Vec<Subscription>>;

    /// Active, auto-renewing subscriptions whose period ends in `(from, to]`.
    async fn list_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Res<Vec<Subscription>>;

    async fn list_active(&self) -> Res<Vec<Subscription>>;

    async fn count_active_for_plan(&self, plan_id: Uuid) -> Res<i64>;
}

pub struct PgSubscriptionStore {
    pool: Arc<PgPool>,
}

impl PgSubscriptionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn insert_active(
        &self,
        data: SubscriptionCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (id, subscriber_id, plan_id, status, current_period_start,
                current_period_end, cancel_at_period_end, payment_method_id, created_at, updated_at)
            VALUES ($1, $2, $3, 'active', $4, $5, FALSE, $6, $7, $7)
            ON CONFLICT (subscriber_id) WHERE status = 'active' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.subscriber_id)
        .bind(data.plan_id)
        .bind(data.period_start)
        .bind(data.period_end)
        .bind(data.payment_method_id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn get_active(&self, subscriber_id: Uuid) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE subscriber_id = $1 AND status = 'active'",
        )
        .bind(subscriber_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions SET cancel_at_period_end = $2, updated_at = $3
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(cancel)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn extend_period(
        &self,
        id: Uuid,
        expected_end: DateTime<Utc>,
        new_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET current_period_start = current_period_end, current_period_end = $3, updated_at = $4
            WHERE id = $1 AND status = 'active' AND current_period_end = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_end)
        .bind(new_end)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn change_plan(
        &self,
        id: Uuid,
        plan_id: Uuid,
        payment_method_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET plan_id = $2, payment_method_id = COALESCE($3, payment_method_id), updated_at = $4
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(plan_id)
        .bind(payment_method_id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Res<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE status = 'active' AND current_period_end <= $1
            ORDER BY current_period_end
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn list_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Res<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE status = 'active' AND NOT cancel_at_period_end
              AND current_period_end > $1 AND current_period_end <= $2
            ORDER BY current_period_end
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn list_active(&self) -> Res<Vec<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE status = 'active' ORDER BY created_at",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn count_active_for_plan(&self, plan_id: Uuid) -> Res<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscriptions WHERE plan_id = $1 AND status = 'active'",
        )
        .bind(plan_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(AppError::from)
    }
}
