use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use common::{
    clock::Clock,
    error::{AppError, Res},
};
use tokio::{task::JoinHandle, time::interval};

pub mod lock;
pub mod sweeps;
pub mod trigger;

use lock::RunLock;
use sweeps::{BoostSweep, PlanSweep, SubscriptionSweep, Sweep, SweepReport, UsageResetSweep};
use trigger::Trigger;

struct Job {
    trigger: Trigger,
    sweep: Arc<dyn Sweep>,
    next_run: Mutex<DateTime<Utc>>,
}

/// Fires sweeps on their triggers. Time only comes from the injected clock,
/// so `tick` can be driven by hand; `start` drives it on a real interval.
///
/// A tick that finds a job several occurrences late runs it once and
/// schedules the next occurrence after now.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    lock: Arc<dyn RunLock>,
    lock_ttl: Duration,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, lock: Arc<dyn RunLock>, lock_ttl: Duration) -> Self {
        Self {
            clock,
            lock,
            lock_ttl,
            jobs: Vec::new(),
        }
    }

    /// The four reconciliation sweeps on their production triggers.
    pub fn standard(
        clock: Arc<dyn Clock>,
        lock: Arc<dyn RunLock>,
        lock_ttl: Duration,
        subscriptions: SubscriptionSweep,
        boosts: BoostSweep,
        plans: PlanSweep,
        usage: UsageResetSweep,
    ) -> Res<Self> {
        Ok(Self::new(clock, lock, lock_ttl)
            .with_job(Trigger::daily(1, 0)?, Arc::new(subscriptions))
            .with_job(Trigger::hourly(0)?, Arc::new(boosts))
            .with_job(Trigger::daily(2, 0)?, Arc::new(plans))
            .with_job(Trigger::monthly(1, 3, 0)?, Arc::new(usage)))
    }

    pub fn with_job(mut self, trigger: Trigger, sweep: Arc<dyn Sweep>) -> Self {
        let next_run = trigger.next_after(self.clock.now());
        log::info!("Sweep {} scheduled {}, first run {}", sweep.name(), trigger, next_run);
        self.jobs.push(Job {
            trigger,
            sweep,
            next_run: Mutex::new(next_run),
        });
        self
    }

    pub fn next_run(&self, job: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|j| j.sweep.name() == job)
            .map(|j| *j.next_run.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Runs every job whose next run is due, one after another, and returns
    /// the reports of the runs that completed.
    pub async fn tick(&self) -> Vec<SweepReport> {
        let now = self.clock.now();
        let mut reports = Vec::new();

        for job in &self.jobs {
            {
                let mut next_run = job.next_run.lock().unwrap_or_else(|e| e.into_inner());
                if *next_run > now {
                    continue;
                }
                *next_run = job.trigger.next_after(now);
            }

            if let Some(report) = self.run_job(job, now).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Runs one sweep immediately, outside its trigger. Still honours the
    /// run-lock.
    pub async fn run_now(&self, job: &str) -> Res<SweepReport> {
        let found = self
            .jobs
            .iter()
            .find(|j| j.sweep.name() == job)
            .ok_or_else(|| AppError::NotFound(format!("sweep {}", job)))?;

        let token = self
            .lock
            .try_acquire(job, self.lock_ttl)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("Sweep {} is already running", job)))?;
        let result = found.sweep.run(self.clock.now()).await;
        self.release(job, &token).await;
        result
    }

    /// Ticks forever on a tokio interval. Returns the handle for shutdown.
    pub fn start(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    async fn run_job(&self, job: &Job, now: DateTime<Utc>) -> Option<SweepReport> {
        let name = job.sweep.name();
        let token = match self.lock.try_acquire(name, self.lock_ttl).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                log::info!("Sweep {} skipped: a previous run still holds the lock", name);
                return None;
            }
            Err(e) => {
                log::error!("Sweep {} skipped: run-lock unavailable: {}", name, e);
                return None;
            }
        };

        log::info!("Sweep {} started", name);
        let result = job.sweep.run(now).await;
        self.release(name, &token).await;

        match result {
            Ok(report) => {
                log::info!(
                    "Sweep {} done: examined {}, affected {}, failed {}",
                    name,
                    report.examined,
                    report.affected,
                    report.failed
                );
                Some(report)
            }
            Err(e) => {
                log::error!(
                    "Sweep {} aborted, retrying at {}: {}",
                    name,
                    job.trigger.next_after(now),
                    e
                );
                None
            }
        }
    }

    async fn release(&self, job: &str, token: &str) {
        if let Err(e) = self.lock.release(job, token).await {
            log::warn!("Failed to release run-lock of sweep {}: {}", job, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use async_trait::async_trait;
    use boost::BoostManager;
    use catalog::PlanCatalog;
    use chrono::TimeZone;
    use common::{
        clock::ManualClock,
        notify::{LogNotifier, Notifier},
    };
    use db::{
        dtos::{listing::ListingCreateRequest, plan::PlanCreateRequest},
        listing::ListingStore,
        memory::MemoryStore,
        models::{
            boost::BoostStatus,
            plan::{BillingInterval, Plan, PlanFeatures, PlanTier},
            subscription::SubscriptionStatus,
        },
        usage::UsageStore,
    };
    use downgrade::DowngradeReconciler;
    use subs::services::{
        pay::{ChargeReceipt, ChargeRequest, PaymentGateway},
        sub::SubscriptionManager,
        usage::UsageLedger,
    };
    use uuid::Uuid;

    use super::*;
    use crate::lock::LocalRunLock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 10, 30, 0).unwrap()
    }

    fn at(mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, mo, d, h, 0, 0).unwrap()
    }

    /// Fails with a provider error for the listed subscribers.
    #[derive(Default)]
    struct FlakyPayments {
        failing: Mutex<HashSet<Uuid>>,
    }

    #[async_trait]
    impl PaymentGateway for FlakyPayments {
        async fn charge(&self, req: ChargeRequest) -> Res<ChargeReceipt> {
            if self.failing.lock().unwrap().contains(&req.subscriber_id) {
                return Err(AppError::Internal("provider timeout".to_string()));
            }
            Ok(ChargeReceipt {
                reference: "test".to_string(),
                amount: req.amount,
                currency: req.currency,
            })
        }
    }

    struct Engine {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        payments: Arc<FlakyPayments>,
        ledger: Arc<UsageLedger>,
        subscriptions: Arc<SubscriptionManager>,
        boosts: Arc<BoostManager>,
        catalog: Arc<PlanCatalog>,
    }

    impl Engine {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::new(t0()));
            let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
            let payments = Arc::new(FlakyPayments::default());
            let ledger = Arc::new(UsageLedger::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                notifier.clone(),
                clock.clone(),
            ));
            let subscriptions = Arc::new(SubscriptionManager::new(
                store.clone(),
                store.clone(),
                ledger.clone(),
                Arc::new(DowngradeReconciler::new(store.clone(), store.clone())),
                payments.clone(),
                notifier,
                clock.clone(),
            ));
            let boosts = Arc::new(BoostManager::new(
                store.clone(),
                store.clone(),
                ledger.clone(),
                clock.clone(),
            ));
            let catalog = Arc::new(PlanCatalog::new(store.clone(), store.clone(), clock.clone()));
            Engine {
                store,
                clock,
                payments,
                ledger,
                subscriptions,
                boosts,
                catalog,
            }
        }

        fn subscription_sweep(&self) -> SubscriptionSweep {
            SubscriptionSweep::new(self.store.clone(), self.subscriptions.clone(), 3)
        }

        fn boost_sweep(&self) -> BoostSweep {
            BoostSweep::new(self.store.clone(), self.boosts.clone())
        }

        fn scheduler(&self, lock: Arc<dyn RunLock>) -> Scheduler {
            Scheduler::standard(
                self.clock.clone(),
                lock,
                Duration::from_secs(60),
                self.subscription_sweep(),
                self.boost_sweep(),
                PlanSweep::new(self.store.clone(), self.catalog.clone()),
                UsageResetSweep::new(self.store.clone(), self.ledger.clone()),
            )
            .unwrap()
        }

        async fn plan(&self, price: i64) -> Plan {
            self.catalog
                .create(PlanCreateRequest {
                    name: format!("plan at {}", price),
                    tier: PlanTier::Basic,
                    price,
                    currency: "usd".to_string(),
                    billing_interval: BillingInterval::Month,
                    features: PlanFeatures {
                        max_listings: 10,
                        max_boosts: 5,
                        flags: BTreeMap::new(),
                    },
                    active: true,
                })
                .await
                .unwrap()
        }

        async fn subscriber(&self, plan: &Plan) -> Uuid {
            let subscriber = Uuid::new_v4();
            self.subscriptions
                .subscribe(subscriber, plan.id, Some("pm_card_visa".to_string()))
                .await
                .unwrap();
            subscriber
        }
    }

    fn report<'a>(reports: &'a [SweepReport], job: &str) -> Option<&'a SweepReport> {
        reports.iter().find(|r| r.job == job)
    }

    #[tokio::test]
    async fn standard_jobs_use_production_triggers() {
        let engine = Engine::new();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));

        assert_eq!(scheduler.next_run("subscriptions"), Some(at(6, 16, 1)));
        assert_eq!(scheduler.next_run("boosts"), Some(at(6, 15, 11)));
        assert_eq!(scheduler.next_run("plans"), Some(at(6, 16, 2)));
        assert_eq!(scheduler.next_run("usage"), Some(at(7, 1, 3)));
        assert_eq!(scheduler.tick().await, Vec::new());
    }

    #[tokio::test]
    async fn past_due_boost_expires_once() {
        let engine = Engine::new();
        let plan = engine.plan(0).await;
        let subscriber = engine.subscriber(&plan).await;
        let listing = ListingStore::create(
            &*engine.store,
            ListingCreateRequest {
                subscriber_id: subscriber,
                title: "Harbour view".to_string(),
                created_at: t0(),
            },
        )
        .await
        .unwrap();
        let boost = engine
            .boosts
            .create_boost(subscriber, listing.id, 1)
            .await
            .unwrap();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));

        engine.clock.advance(chrono::Duration::days(2));
        let reports = scheduler.tick().await;
        let first = report(&reports, "boosts").unwrap();
        assert_eq!((first.examined, first.affected, first.failed), (1, 1, 0));

        let expired = engine.store.boosts_of(listing.id);
        assert_eq!(expired[0].id, boost.id);
        assert_eq!(expired[0].status, BoostStatus::Expired);

        let second = engine.boost_sweep().run(engine.clock.now()).await.unwrap();
        assert_eq!((second.examined, second.affected), (0, 0));
        assert_eq!(engine.store.boosts_of(listing.id), expired);
    }

    #[tokio::test]
    async fn period_end_cancellation_retires_without_renewal() {
        let engine = Engine::new();
        let plan = engine.plan(1500).await;
        let subscriber = engine.subscriber(&plan).await;
        let before = engine.subscriptions.cancel(subscriber, false).await.unwrap();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));

        engine.clock.set(at(7, 16, 1));
        let reports = scheduler.tick().await;
        assert_eq!(report(&reports, "subscriptions").unwrap().affected, 1);

        let stored = engine.store.subscriptions_of(subscriber);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SubscriptionStatus::Cancelled);
        assert_eq!(stored[0].current_period_end, before.current_period_end);
    }

    #[tokio::test]
    async fn renewal_failure_is_counted_and_skipped() {
        let engine = Engine::new();
        let plan = engine.plan(1500).await;
        let healthy = engine.subscriber(&plan).await;
        let flaky = engine.subscriber(&plan).await;
        engine.payments.failing.lock().unwrap().insert(flaky);

        let now = at(7, 16, 1);
        let report = engine.subscription_sweep().run(now).await.unwrap();
        assert_eq!((report.examined, report.affected, report.failed), (2, 1, 1));

        let renewed = engine.subscriptions.get_active(healthy).await.unwrap();
        assert!(renewed.current_period_end > now);
        let pending = engine.subscriptions.get_active(flaky).await.unwrap();
        assert!(pending.current_period_end <= now);
    }

    #[tokio::test]
    async fn held_lock_skips_the_run() {
        let engine = Engine::new();
        let lock = Arc::new(LocalRunLock::new());
        let scheduler = engine.scheduler(lock.clone());
        lock.try_acquire("boosts", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        engine.clock.advance(chrono::Duration::hours(2));
        let reports = scheduler.tick().await;
        assert!(report(&reports, "boosts").is_none());
        assert!(scheduler.next_run("boosts").unwrap() > engine.clock.now());

        let manual = scheduler.run_now("boosts").await;
        assert!(matches!(manual, Err(AppError::Conflict(_))));
    }

    struct Unlistable;

    #[async_trait]
    impl Sweep for Unlistable {
        fn name(&self) -> &'static str {
            "unlistable"
        }

        async fn run(&self, _now: DateTime<Utc>) -> Res<SweepReport> {
            Err(AppError::Storage("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn listing_failure_aborts_only_that_sweep() {
        let engine = Engine::new();
        let lock = Arc::new(LocalRunLock::new());
        let scheduler = Scheduler::new(engine.clock.clone(), lock.clone(), Duration::from_secs(60))
            .with_job(Trigger::hourly(0).unwrap(), Arc::new(Unlistable))
            .with_job(Trigger::hourly(0).unwrap(), Arc::new(engine.boost_sweep()));

        engine.clock.advance(chrono::Duration::hours(1));
        let reports = scheduler.tick().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job, "boosts");
        assert_eq!(scheduler.next_run("unlistable"), Some(at(6, 15, 12)));

        // the lock was released despite the failure
        assert!(
            lock.try_acquire("unlistable", Duration::from_secs(60))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn scheduled_deactivation_applies_at_the_plan_sweep() {
        let engine = Engine::new();
        let plan = engine.plan(900).await;
        engine
            .catalog
            .schedule_deactivation(plan.id, t0() + chrono::Duration::hours(1))
            .await
            .unwrap();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));

        engine.clock.set(at(6, 16, 2));
        let reports = scheduler.tick().await;
        assert_eq!(report(&reports, "plans").unwrap().affected, 1);

        let stored = engine.catalog.get(plan.id).await.unwrap();
        assert!(!stored.active);
        assert_eq!(stored.scheduled_deactivate_at, None);
    }

    #[tokio::test]
    async fn monthly_reset_clears_boost_counters() {
        let engine = Engine::new();
        let plan = engine.plan(0).await;
        let subscriber = engine.subscriber(&plan).await;
        engine.ledger.check_and_reserve_listing(subscriber).await.unwrap();
        engine.ledger.check_and_reserve_boost(subscriber).await.unwrap();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));

        engine.clock.set(at(7, 1, 3));
        let reports = scheduler.tick().await;
        assert_eq!(report(&reports, "usage").unwrap().affected, 1);

        let usage = UsageStore::get(&*engine.store, subscriber)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(usage.boosts_used, 0);
        assert_eq!(usage.listings_created, 1);

        let rerun = scheduler.run_now("usage").await.unwrap();
        assert_eq!(rerun.affected, 0);
    }

    #[tokio::test]
    async fn unknown_sweep_is_not_found() {
        let engine = Engine::new();
        let scheduler = engine.scheduler(Arc::new(LocalRunLock::new()));
        assert!(matches!(
            scheduler.run_now("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
