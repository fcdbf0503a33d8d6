use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use sqlx::{PgPool, types::Json};
use uuid::Uuid;

use crate::{
    dtos::plan::{PlanCreateRequest, PlanUpdateRequest},
    models::plan::Plan,
};

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn insert(&self, data: PlanCreateRequest, now: DateTime<Utc>) -> Res<Plan>;

    async fn get(&self, id: Uuid) -> Res<Option<Plan>>;

    /// Plans ordered by tier then price.
    async fn list(&self, include_inactive: bool) -> Res<Vec<Plan>>;

    async fn update(
        &self,
        id: Uuid,
        patch: PlanUpdateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Plan>>;

    /// Returns false if the plan did not exist.
    async fn delete(&self, id: Uuid) -> Res<bool>;

    /// Plans with a scheduled activation or deactivation at or before `now`.
    async fn list_schedule_due(&self, now: DateTime<Utc>) -> Res<Vec<Plan>>;
}

pub struct PgPlanStore {
    pool: Arc<PgPool>,
}

impl PgPlanStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

const TIER_ORDER: &str = "CASE tier WHEN 'free' THEN 0 WHEN 'basic' THEN 1 WHEN 'premium' THEN 2 ELSE 3 END";

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn insert(&self, data: PlanCreateRequest, now: DateTime<Utc>) -> Res<Plan> {
        sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (id, name, tier, price, currency, billing_interval, features, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.name)
        .bind(data.tier.as_str())
        .bind(data.price)
        .bind(data.currency)
        .bind(data.billing_interval.as_str())
        .bind(Json(data.features))
        .bind(data.active)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Plan>> {
        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn list(&self, include_inactive: bool) -> Res<Vec<Plan>> {
        let sql = format!(
            "SELECT * FROM plans WHERE $1 OR active ORDER BY {}, price, name",
            TIER_ORDER
        );
        sqlx::query_as::<_, Plan>(&sql)
            .bind(include_inactive)
            .fetch_all(&*self.pool)
            .await
            .map_err(AppError::from)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: PlanUpdateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Plan>> {
        sqlx::query_as::<_, Plan>(
            r#"
            UPDATE plans SET
                name = COALESCE($2, name),
                tier = COALESCE($3, tier),
                price = COALESCE($4, price),
                currency = COALESCE($5, currency),
                billing_interval = COALESCE($6, billing_interval),
                features = COALESCE($7, features),
                active = COALESCE($8, active),
                scheduled_activate_at = CASE WHEN $9 THEN $10 ELSE scheduled_activate_at END,
                scheduled_deactivate_at = CASE WHEN $11 THEN $12 ELSE scheduled_deactivate_at END,
                updated_at = $13
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.tier.map(|t| t.as_str()))
        .bind(patch.price)
        .bind(patch.currency)
        .bind(patch.billing_interval.map(|i| i.as_str()))
        .bind(patch.features.map(Json))
        .bind(patch.active)
        .bind(patch.scheduled_activate_at.is_some())
        .bind(patch.scheduled_activate_at.flatten())
        .bind(patch.scheduled_deactivate_at.is_some())
        .bind(patch.scheduled_deactivate_at.flatten())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn delete(&self, id: Uuid) -> Res<bool> {
        let result = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_schedule_due(&self, now: DateTime<Utc>) -> Res<Vec<Plan>> {
        sqlx::query_as::<_, Plan>(
            r#"
            SELECT * FROM plans
            WHERE scheduled_activate_at <= $1 OR scheduled_deactivate_at <= $1
            ORDER BY LEAST(
                COALESCE(scheduled_activate_at, 'infinity'),
                COALESCE(scheduled_deactivate_at, 'infinity')
            )
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(AppError::from)
    }
}
