use std::{sync::Arc, time::Duration};

use boost::BoostManager;
use catalog::PlanCatalog;
use common::{clock::Clock, env_config::SchedulerConfig, error::Res, notify::Notifier};
use db::Stores;
use downgrade::DowngradeReconciler;
use scheduler::{
    Scheduler,
    lock::RunLock,
    sweeps::{BoostSweep, PlanSweep, SubscriptionSweep, UsageResetSweep},
};
use subs::services::{pay::PaymentGateway, sub::SubscriptionManager, usage::UsageLedger};

/// The engine's components, wired once and shared by every worker.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<PlanCatalog>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub ledger: Arc<UsageLedger>,
    pub boosts: Arc<BoostManager>,
    pub reconciler: Arc<DowngradeReconciler>,
}

impl Services {
    pub fn new(
        stores: &Stores,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(UsageLedger::new(
            stores.usage.clone(),
            stores.subscriptions.clone(),
            stores.plans.clone(),
            stores.listings.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let reconciler = Arc::new(DowngradeReconciler::new(
            stores.plans.clone(),
            stores.listings.clone(),
        ));

        Services {
            catalog: Arc::new(PlanCatalog::new(
                stores.plans.clone(),
                stores.subscriptions.clone(),
                clock.clone(),
            )),
            subscriptions: Arc::new(SubscriptionManager::new(
                stores.plans.clone(),
                stores.subscriptions.clone(),
                ledger.clone(),
                reconciler.clone(),
                payments,
                notifier,
                clock.clone(),
            )),
            boosts: Arc::new(BoostManager::new(
                stores.boosts.clone(),
                stores.listings.clone(),
                ledger.clone(),
                clock,
            )),
            ledger,
            reconciler,
        }
    }

    pub fn scheduler(
        &self,
        stores: &Stores,
        clock: Arc<dyn Clock>,
        lock: Arc<dyn RunLock>,
        config: &SchedulerConfig,
    ) -> Res<Scheduler> {
        Scheduler::standard(
            clock,
            lock,
            Duration::from_secs(config.lock_ttl_secs),
            SubscriptionSweep::new(
                stores.subscriptions.clone(),
                self.subscriptions.clone(),
                config.renewal_reminder_days,
            ),
            BoostSweep::new(stores.boosts.clone(), self.boosts.clone()),
            PlanSweep::new(stores.plans.clone(), self.catalog.clone()),
            UsageResetSweep::new(stores.subscriptions.clone(), self.ledger.clone()),
        )
    }
}
