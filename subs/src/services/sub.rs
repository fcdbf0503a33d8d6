use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{
    clock::Clock,
    error::{AppError, Res},
    notify::{Notification, Notifier, dispatch},
};
use db::{
    dtos::subscription::SubscriptionCreateRequest,
    models::{
        plan::Plan,
        subscription::{Subscription, SubscriptionStatus},
    },
    plan::PlanStore,
    subscription::SubscriptionStore,
};
use downgrade::{DowngradeReconciler, DowngradeReport};
use uuid::Uuid;

use crate::{
    dtos::sub::{PlanChangeResponse, RenewalOutcome},
    services::{
        pay::{ChargeReason, ChargeRequest, PaymentGateway},
        usage::UsageLedger,
    },
};

/// Lifecycle of subscriptions: subscribe, cancel, plan changes and the
/// renewal step driven by the scheduler.
pub struct SubscriptionManager {
    plans: Arc<dyn PlanStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: Arc<UsageLedger>,
    reconciler: Arc<DowngradeReconciler>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(
        plans: Arc<dyn PlanStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: Arc<UsageLedger>,
        reconciler: Arc<DowngradeReconciler>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plans,
            subscriptions,
            ledger,
            reconciler,
            payments,
            notifier,
            clock,
        }
    }

    pub async fn subscribe(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        payment_method_id: Option<String>,
    ) -> Res<Subscription> {
        let plan = self.plan(plan_id).await?;
        if !plan.active {
            return Err(AppError::Validation(format!(
                "Plan {} is not open for subscription",
                plan.name
            )));
        }
        if self.subscriptions.get_active(subscriber_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "Subscriber {} already has an active subscription",
                subscriber_id
            )));
        }

        let payment_method_id = payment_method_id.filter(|pm| !pm.trim().is_empty());
        if plan.is_paid() {
            let Some(pm) = payment_method_id.clone() else {
                return Err(AppError::PaymentRequired(format!(
                    "Plan {} requires a payment method",
                    plan.name
                )));
            };
            self.payments
                .charge(ChargeRequest {
                    subscriber_id,
                    plan_id,
                    payment_method_id: pm,
                    amount: plan.price,
                    currency: plan.currency.clone(),
                    reason: ChargeReason::Subscribe,
                })
                .await?;
        }

        let now = self.clock.now();
        let subscription = self
            .subscriptions
            .insert_active(
                SubscriptionCreateRequest {
                    subscriber_id,
                    plan_id,
                    payment_method_id,
                    period_start: now,
                    period_end: plan.billing_interval.advance(now),
                },
                now,
            )
            .await?
            .ok_or_else(|| {
                if plan.is_paid() {
                    log::error!(
                        "Subscriber {} was charged for plan {} but lost the subscribe race. Refund needed.",
                        subscriber_id,
                        plan_id
                    );
                }
                AppError::Conflict(format!(
                    "Subscriber {} already has an active subscription",
                    subscriber_id
                ))
            })?;

        if let Err(e) = self.ledger.ensure(subscriber_id, plan_id).await {
            log::error!(
                "Subscription {} of {} has no usage period: {}. Quota checks will fail until repaired.",
                subscription.id,
                subscriber_id,
                e
            );
        }

        log::info!(
            "Subscriber {} subscribed to plan {} until {}",
            subscriber_id,
            plan.name,
            subscription.current_period_end
        );
        Ok(subscription)
    }

    pub async fn cancel(&self, subscriber_id: Uuid, immediate: bool) -> Res<Subscription> {
        let active = self.get_active(subscriber_id).await?;
        let now = self.clock.now();

        let updated = if immediate {
            self.subscriptions
                .transition(
                    active.id,
                    SubscriptionStatus::Active,
                    SubscriptionStatus::Cancelled,
                    now,
                )
                .await?
        } else {
            self.subscriptions
                .set_cancel_at_period_end(active.id, true, now)
                .await?
        };
        let updated = updated.ok_or_else(|| {
            AppError::NotFound(format!("active subscription for {}", subscriber_id))
        })?;

        dispatch(
            &self.notifier,
            Notification::CancellationConfirmed {
                subscriber_id,
                immediate,
            },
        );
        Ok(updated)
    }

    pub async fn get_active(&self, subscriber_id: Uuid) -> Res<Subscription> {
        self.subscriptions
            .get_active(subscriber_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("active subscription for {}", subscriber_id)))
    }

    pub async fn set_auto_renew(&self, subscriber_id: Uuid, auto_renew: bool) -> Res<Subscription> {
        let active = self.get_active(subscriber_id).await?;
        self.subscriptions
            .set_cancel_at_period_end(active.id, !auto_renew, self.clock.now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("active subscription for {}", subscriber_id)))
    }

    /// Moves the active subscription to another plan and hides whatever no
    /// longer fits. Upgrades are charged the price difference; the current
    /// period is kept. Asking for the plan the subscription is already on
    /// charges nothing and re-applies that plan's limits, which finishes a
    /// change that failed after the plan was switched.
    pub async fn change_plan(
        &self,
        subscriber_id: Uuid,
        new_plan_id: Uuid,
        payment_method_id: Option<String>,
    ) -> Res<PlanChangeResponse> {
        let active = self.get_active(subscriber_id).await?;
        let new_plan = self.plan(new_plan_id).await?;
        if active.plan_id == new_plan_id {
            let downgrade = self.apply_limits(subscriber_id, &new_plan).await?;
            return Ok(PlanChangeResponse {
                subscription: active,
                downgrade,
            });
        }

        if !new_plan.active {
            return Err(AppError::Validation(format!(
                "Plan {} is not open for subscription",
                new_plan.name
            )));
        }

        let payment_method_id = payment_method_id.filter(|pm| !pm.trim().is_empty());
        let method = payment_method_id
            .clone()
            .or_else(|| active.payment_method_id.clone());
        let current_price = match self.plans.get(active.plan_id).await? {
            Some(plan) => plan.price,
            None => 0,
        };
        if new_plan.price > current_price {
            let Some(pm) = method else {
                return Err(AppError::PaymentRequired(format!(
                    "Plan {} requires a payment method",
                    new_plan.name
                )));
            };
            self.payments
                .charge(ChargeRequest {
                    subscriber_id,
                    plan_id: new_plan_id,
                    payment_method_id: pm,
                    amount: new_plan.price - current_price,
                    currency: new_plan.currency.clone(),
                    reason: ChargeReason::Upgrade,
                })
                .await?;
        }

        let subscription = self
            .subscriptions
            .change_plan(active.id, new_plan_id, payment_method_id, self.clock.now())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("active subscription for {}", subscriber_id))
            })?;

        log::info!(
            "Subscriber {} moved from plan {} to {}",
            subscriber_id,
            active.plan_id,
            new_plan.name
        );

        let downgrade = match self.apply_limits(subscriber_id, &new_plan).await {
            Ok(downgrade) => downgrade,
            Err(e) => {
                log::error!(
                    "Subscriber {} is on plan {} but its limits were not applied: {}. Repeat the plan change to repair.",
                    subscriber_id,
                    new_plan.name,
                    e
                );
                return Err(e);
            }
        };

        Ok(PlanChangeResponse {
            subscription,
            downgrade,
        })
    }

    /// Renews or retires one subscription whose period ended at or before
    /// `now`. Every write is conditional on the state read here, so running
    /// it twice for the same period changes nothing the second time.
    ///
    /// A declined charge expires the subscription; provider or storage
    /// failures are returned so the next sweep can try again.
    pub async fn renew_or_retire(
        &self,
        subscription_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<RenewalOutcome> {
        let Some(subscription) = self.subscriptions.get(subscription_id).await? else {
            return Err(AppError::NotFound(format!(
                "subscription {}",
                subscription_id
            )));
        };
        if !subscription.is_due(now) {
            return Ok(RenewalOutcome::Skipped);
        }

        if subscription.cancel_at_period_end {
            return self
                .retire(
                    &subscription,
                    SubscriptionStatus::Cancelled,
                    "cancelled at period end",
                    now,
                )
                .await;
        }

        let Some(plan) = self.plans.get(subscription.plan_id).await? else {
            return self
                .retire(
                    &subscription,
                    SubscriptionStatus::Expired,
                    "plan no longer exists",
                    now,
                )
                .await;
        };

        if plan.is_paid() {
            let Some(pm) = subscription.payment_method_id.clone() else {
                return self
                    .retire(
                        &subscription,
                        SubscriptionStatus::Expired,
                        "no payment method on file",
                        now,
                    )
                    .await;
            };

            let charged = self
                .payments
                .charge(ChargeRequest {
                    subscriber_id: subscription.subscriber_id,
                    plan_id: plan.id,
                    payment_method_id: pm,
                    amount: plan.price,
                    currency: plan.currency.clone(),
                    reason: ChargeReason::Renewal,
                })
                .await;

            match charged {
                Ok(_) => {}
                Err(AppError::PaymentRequired(reason)) => {
                    return self
                        .retire(
                            &subscription,
                            SubscriptionStatus::Expired,
                            &format!("renewal payment declined: {}", reason),
                            now,
                        )
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        let new_end = plan
            .billing_interval
            .advance(subscription.current_period_end);
        let renewed = self
            .subscriptions
            .extend_period(subscription.id, subscription.current_period_end, new_end, now)
            .await?;

        Ok(match renewed {
            Some(renewed) => {
                dispatch(
                    &self.notifier,
                    Notification::SubscriptionRenewed {
                        subscriber_id: renewed.subscriber_id,
                        period_end: renewed.current_period_end,
                    },
                );
                RenewalOutcome::Renewed(renewed)
            }
            None => RenewalOutcome::Skipped,
        })
    }

    /// Reminds auto-renewing subscribers whose period ends in the 24 hours
    /// that start `days_ahead` days from `now`. Run once a day, every
    /// subscriber hears about a renewal once.
    pub async fn send_renewal_reminders(&self, now: DateTime<Utc>, days_ahead: i64) -> Res<usize> {
        let to = now + Duration::days(days_ahead);
        let from = to - Duration::days(1);
        let ending = self.subscriptions.list_ending_between(from, to).await?;

        for subscription in &ending {
            dispatch(
                &self.notifier,
                Notification::RenewalReminder {
                    subscriber_id: subscription.subscriber_id,
                    plan_id: subscription.plan_id,
                    renews_at: subscription.current_period_end,
                },
            );
        }
        Ok(ending.len())
    }

    async fn retire(
        &self,
        subscription: &Subscription,
        to: SubscriptionStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Res<RenewalOutcome> {
        let Some(retired) = self
            .subscriptions
            .transition(subscription.id, SubscriptionStatus::Active, to, now)
            .await?
        else {
            return Ok(RenewalOutcome::Skipped);
        };

        log::info!(
            "Subscription {} of {} is now {}: {}",
            retired.id,
            retired.subscriber_id,
            to.as_str(),
            reason
        );
        dispatch(
            &self.notifier,
            Notification::SubscriptionLapsed {
                subscriber_id: retired.subscriber_id,
                reason: reason.to_string(),
            },
        );

        Ok(match to {
            SubscriptionStatus::Cancelled => RenewalOutcome::Cancelled(retired),
            _ => RenewalOutcome::Expired(retired),
        })
    }

    /// Points usage at `plan` and hides the listings that exceed its limit.
    async fn apply_limits(&self, subscriber_id: Uuid, plan: &Plan) -> Res<DowngradeReport> {
        self.ledger.rebind(subscriber_id, plan.id).await?;

        let downgrade = self.reconciler.reconcile(subscriber_id, plan.id).await?;
        if downgrade.disabled_count > 0 {
            dispatch(
                &self.notifier,
                Notification::ListingsDisabled {
                    subscriber_id,
                    count: downgrade.disabled_count,
                },
            );
        }
        Ok(downgrade)
    }

    async fn plan(&self, plan_id: Uuid) -> Res<Plan> {
        self.plans
            .get(plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", plan_id)))
    }
}
