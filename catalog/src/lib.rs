use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    clock::Clock,
    error::{AppError, Res},
};
use db::{
    dtos::plan::{PlanCreateRequest, PlanUpdateRequest},
    models::plan::{Plan, PlanFeatures, PlanStats},
    plan::PlanStore,
    subscription::SubscriptionStore,
};
use uuid::Uuid;

/// Administrator-owned catalog of purchasable plans.
///
/// Scheduling only records timestamps; the plan sweep is the sole reader.
pub struct PlanCatalog {
    plans: Arc<dyn PlanStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl PlanCatalog {
    pub fn new(
        plans: Arc<dyn PlanStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plans,
            subscriptions,
            clock,
        }
    }

    pub async fn create(&self, req: PlanCreateRequest) -> Res<Plan> {
        validate_name(&req.name)?;
        validate_price(req.price)?;
        validate_currency(&req.currency)?;
        validate_features(&req.features)?;

        let req = PlanCreateRequest {
            currency: req.currency.to_lowercase(),
            ..req
        };
        let plan = self.plans.insert(req, self.clock.now()).await?;
        log::info!("Created plan {} ({}, tier {})", plan.id, plan.name, plan.tier);
        Ok(plan)
    }

    pub async fn get(&self, id: Uuid) -> Res<Plan> {
        self.plans
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", id)))
    }

    pub async fn list_active(&self) -> Res<Vec<Plan>> {
        self.plans.list(false).await
    }

    pub async fn list_all(&self, include_inactive: bool) -> Res<Vec<Plan>> {
        self.plans.list(include_inactive).await
    }

    pub async fn update(&self, id: Uuid, patch: PlanUpdateRequest) -> Res<Plan> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(price) = patch.price {
            validate_price(price)?;
        }
        if let Some(currency) = &patch.currency {
            validate_currency(currency)?;
        }
        if let Some(features) = &patch.features {
            validate_features(features)?;
        }

        let patch = PlanUpdateRequest {
            currency: patch.currency.map(|c| c.to_lowercase()),
            ..patch
        };
        self.plans
            .update(id, patch, self.clock.now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", id)))
    }

    /// Removes a plan nobody is actively subscribed to.
    pub async fn delete(&self, id: Uuid) -> Res<()> {
        let subscribers = self.subscriptions.count_active_for_plan(id).await?;
        if subscribers > 0 {
            return Err(AppError::Conflict(format!(
                "plan {} still has {} active subscribers",
                id, subscribers
            )));
        }
        if !self.plans.delete(id).await? {
            return Err(AppError::NotFound(format!("plan {}", id)));
        }
        log::info!("Deleted plan {}", id);
        Ok(())
    }

    pub async fn schedule_activation(&self, id: Uuid, at: DateTime<Utc>) -> Res<Plan> {
        let patch = PlanUpdateRequest {
            scheduled_activate_at: Some(Some(at)),
            ..Default::default()
        };
        let plan = self.update(id, patch).await?;
        log::info!("Plan {} scheduled to activate at {}", id, at);
        Ok(plan)
    }

    pub async fn schedule_deactivation(&self, id: Uuid, at: DateTime<Utc>) -> Res<Plan> {
        let patch = PlanUpdateRequest {
            scheduled_deactivate_at: Some(Some(at)),
            ..Default::default()
        };
        let plan = self.update(id, patch).await?;
        log::info!("Plan {} scheduled to deactivate at {}", id, at);
        Ok(plan)
    }

    /// Applies whichever schedule fields are due at `now`, in timestamp order,
    /// and clears them. Returns `None` if nothing was due.
    pub async fn apply_due_schedule(&self, plan: &Plan, now: DateTime<Utc>) -> Res<Option<Plan>> {
        let activate = plan.scheduled_activate_at.filter(|at| *at <= now);
        let deactivate = plan.scheduled_deactivate_at.filter(|at| *at <= now);

        let active = match (activate, deactivate) {
            (None, None) => return Ok(None),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            // the later instruction wins
            (Some(on), Some(off)) => on > off,
        };

        let patch = PlanUpdateRequest {
            active: Some(active),
            scheduled_activate_at: activate.map(|_| None),
            scheduled_deactivate_at: deactivate.map(|_| None),
            ..Default::default()
        };
        let updated = self
            .plans
            .update(plan.id, patch, now)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", plan.id)))?;
        log::info!(
            "Plan {} is now {}",
            updated.id,
            if updated.active { "active" } else { "inactive" }
        );
        Ok(Some(updated))
    }

    pub async fn stats(&self, id: Uuid) -> Res<PlanStats> {
        let plan = self.get(id).await?;
        let subscriber_count = self.subscriptions.count_active_for_plan(id).await?;
        Ok(PlanStats {
            plan_id: plan.id,
            subscriber_count,
            revenue: subscriber_count.saturating_mul(plan.price),
            currency: plan.currency,
        })
    }
}

fn validate_name(name: &str) -> Res<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("plan name is required".to_string()));
    }
    Ok(())
}

fn validate_price(price: i64) -> Res<()> {
    if price < 0 {
        return Err(AppError::Validation(format!(
            "plan price must not be negative, got {}",
            price
        )));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Res<()> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation(format!(
            "currency must be a 3-letter ISO code, got '{}'",
            currency
        )));
    }
    Ok(())
}

fn validate_features(features: &PlanFeatures) -> Res<()> {
    if features.max_listings < PlanFeatures::UNLIMITED || features.max_boosts < PlanFeatures::UNLIMITED
    {
        return Err(AppError::Validation(
            "limits must be -1 (unlimited) or a non-negative count".to_string(),
        ));
    }
    Ok(())
}
