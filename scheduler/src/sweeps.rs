use std::sync::Arc;

use async_trait::async_trait;
use boost::BoostManager;
use catalog::PlanCatalog;
use chrono::{DateTime, Utc};
use common::error::Res;
use db::{boost::BoostStore, plan::PlanStore, subscription::SubscriptionStore};
use serde::Serialize;
use subs::{
    dtos::sub::RenewalOutcome,
    services::{sub::SubscriptionManager, usage::UsageLedger},
};

/// Counts from one run of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub job: &'static str,
    pub examined: usize,
    pub affected: usize,
    pub failed: usize,
}

impl SweepReport {
    fn new(job: &'static str, examined: usize) -> Self {
        SweepReport {
            job,
            examined,
            ..Default::default()
        }
    }

    fn failure(&mut self, what: impl std::fmt::Display, e: impl std::fmt::Display) {
        self.failed += 1;
        log::error!("Sweep {}: {} failed: {}", self.job, what, e);
    }
}

/// One idempotent reconciliation pass. An error means the candidates could
/// not be listed and nothing was attempted; failures on single entities are
/// counted in the report instead.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>) -> Res<SweepReport>;
}

pub struct SubscriptionSweep {
    subscriptions: Arc<dyn SubscriptionStore>,
    manager: Arc<SubscriptionManager>,
    reminder_days: i64,
}

impl SubscriptionSweep {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        manager: Arc<SubscriptionManager>,
        reminder_days: i64,
    ) -> Self {
        Self {
            subscriptions,
            manager,
            reminder_days,
        }
    }
}

#[async_trait]
impl Sweep for SubscriptionSweep {
    fn name(&self) -> &'static str {
        "subscriptions"
    }

    async fn run(&self, now: DateTime<Utc>) -> Res<SweepReport> {
        let due = self.subscriptions.list_due(now).await?;
        let mut report = SweepReport::new(self.name(), due.len());

        for subscription in due {
            match self.manager.renew_or_retire(subscription.id, now).await {
                Ok(RenewalOutcome::Skipped) => {}
                Ok(_) => report.affected += 1,
                Err(e) => report.failure(format_args!("subscription {}", subscription.id), e),
            }
        }

        if self.reminder_days > 0 {
            match self
                .manager
                .send_renewal_reminders(now, self.reminder_days)
                .await
            {
                Ok(sent) if sent > 0 => log::info!("Sent {} renewal reminders", sent),
                Ok(_) => {}
                Err(e) => log::error!("Renewal reminders skipped: {}", e),
            }
        }
        Ok(report)
    }
}

pub struct BoostSweep {
    boosts: Arc<dyn BoostStore>,
    manager: Arc<BoostManager>,
}

impl BoostSweep {
    pub fn new(boosts: Arc<dyn BoostStore>, manager: Arc<BoostManager>) -> Self {
        Self { boosts, manager }
    }
}

#[async_trait]
impl Sweep for BoostSweep {
    fn name(&self) -> &'static str {
        "boosts"
    }

    async fn run(&self, now: DateTime<Utc>) -> Res<SweepReport> {
        let lapsed = self.boosts.list_lapsed(now).await?;
        let mut report = SweepReport::new(self.name(), lapsed.len());

        for boost in lapsed {
            match self.manager.expire(boost.id).await {
                Ok(_) => report.affected += 1,
                Err(e) => report.failure(format_args!("boost {}", boost.id), e),
            }
        }
        Ok(report)
    }
}

pub struct PlanSweep {
    plans: Arc<dyn PlanStore>,
    catalog: Arc<PlanCatalog>,
}

impl PlanSweep {
    pub fn new(plans: Arc<dyn PlanStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { plans, catalog }
    }
}

#[async_trait]
impl Sweep for PlanSweep {
    fn name(&self) -> &'static str {
        "plans"
    }

    async fn run(&self, now: DateTime<Utc>) -> Res<SweepReport> {
        let due = self.plans.list_schedule_due(now).await?;
        let mut report = SweepReport::new(self.name(), due.len());

        for plan in due {
            match self.catalog.apply_due_schedule(&plan, now).await {
                Ok(Some(_)) => report.affected += 1,
                Ok(None) => {}
                Err(e) => report.failure(format_args!("plan {}", plan.id), e),
            }
        }
        Ok(report)
    }
}

pub struct UsageResetSweep {
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: Arc<UsageLedger>,
}

impl UsageResetSweep {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            subscriptions,
            ledger,
        }
    }
}

#[async_trait]
impl Sweep for UsageResetSweep {
    fn name(&self) -> &'static str {
        "usage"
    }

    async fn run(&self, now: DateTime<Utc>) -> Res<SweepReport> {
        let active = self.subscriptions.list_active().await?;
        let mut report = SweepReport::new(self.name(), active.len());

        for subscription in active {
            match self
                .ledger
                .reset_period_counters(subscription.subscriber_id, now)
                .await
            {
                Ok(Some(_)) => report.affected += 1,
                Ok(None) => {}
                Err(e) => report.failure(
                    format_args!("usage of {}", subscription.subscriber_id),
                    e,
                ),
            }
        }
        Ok(report)
    }
}
