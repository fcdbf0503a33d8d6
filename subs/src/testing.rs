use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::{
    clock::ManualClock,
    error::{AppError, Res},
    notify::{LogNotifier, Notifier},
};
use db::{
    dtos::plan::PlanCreateRequest,
    memory::MemoryStore,
    models::plan::{BillingInterval, Plan, PlanFeatures, PlanTier},
    plan::PlanStore,
};
use downgrade::DowngradeReconciler;
use uuid::Uuid;

use crate::services::{
    pay::{ChargeReceipt, ChargeRequest, PaymentGateway},
    sub::SubscriptionManager,
    usage::UsageLedger,
};

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

/// Records charges; declines everything once `decline` is set.
#[derive(Default)]
pub(crate) struct ScriptedPayments {
    pub(crate) decline: AtomicBool,
    pub(crate) charges: Mutex<Vec<ChargeRequest>>,
}

#[async_trait]
impl PaymentGateway for ScriptedPayments {
    async fn charge(&self, req: ChargeRequest) -> Res<ChargeReceipt> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(AppError::PaymentRequired("card declined".to_string()));
        }
        let receipt = ChargeReceipt {
            reference: format!("test_{}", Uuid::new_v4()),
            amount: req.amount,
            currency: req.currency.clone(),
        };
        self.charges.lock().unwrap().push(req);
        Ok(receipt)
    }
}

pub(crate) struct Harness {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) payments: Arc<ScriptedPayments>,
    pub(crate) ledger: Arc<UsageLedger>,
    pub(crate) manager: SubscriptionManager,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    pub(crate) fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let payments = Arc::new(ScriptedPayments::default());
        let ledger = Arc::new(UsageLedger::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let reconciler = Arc::new(DowngradeReconciler::new(store.clone(), store.clone()));
        let manager = SubscriptionManager::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            reconciler,
            payments.clone(),
            notifier,
            clock.clone(),
        );
        Harness {
            store,
            clock,
            payments,
            ledger,
            manager,
        }
    }

    pub(crate) async fn plan(&self, price: i64, max_listings: i32, max_boosts: i32) -> Plan {
        PlanStore::insert(
            &*self.store,
            PlanCreateRequest {
                name: format!("plan {}/{}", max_listings, max_boosts),
                tier: if price > 0 {
                    PlanTier::Premium
                } else {
                    PlanTier::Free
                },
                price,
                currency: "usd".to_string(),
                billing_interval: BillingInterval::Month,
                features: PlanFeatures {
                    max_listings,
                    max_boosts,
                    flags: BTreeMap::new(),
                },
                active: true,
            },
            t0(),
        )
        .await
        .unwrap()
    }

    pub(crate) fn charge_count(&self) -> usize {
        self.payments.charges.lock().unwrap().len()
    }
}
