use std::sync::Arc;

use common::error::{AppError, Res};
use db::{
    listing::ListingStore,
    models::{listing::Listing, plan::Plan},
    plan::PlanStore,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowngradeReport {
    pub disabled_count: usize,
    pub excess_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DowngradePreview {
    pub current_listings: usize,
    /// `None` when the target plan is unlimited.
    pub new_max: Option<i32>,
    pub excess_count: usize,
    /// Listings that would be hidden, oldest first.
    pub to_disable: Vec<Uuid>,
}

/// Brings a subscriber's public listings within a (smaller) plan's limit by
/// hiding the oldest ones. Listings are never deleted.
pub struct DowngradeReconciler {
    plans: Arc<dyn PlanStore>,
    listings: Arc<dyn ListingStore>,
}

impl DowngradeReconciler {
    pub fn new(plans: Arc<dyn PlanStore>, listings: Arc<dyn ListingStore>) -> Self {
        Self { plans, listings }
    }

    pub async fn preview_downgrade(
        &self,
        subscriber_id: Uuid,
        new_plan_id: Uuid,
    ) -> Res<DowngradePreview> {
        let plan = self.plan(new_plan_id).await?;
        let listings = self.public_listings(subscriber_id).await?;
        let current = listings.len();

        let Some(new_max) = plan.features.listing_limit() else {
            return Ok(DowngradePreview {
                current_listings: current,
                new_max: None,
                excess_count: 0,
                to_disable: Vec::new(),
            });
        };

        let excess = current.saturating_sub(new_max as usize);
        Ok(DowngradePreview {
            current_listings: current,
            new_max: Some(new_max),
            excess_count: excess,
            to_disable: listings.iter().take(excess).map(|l| l.id).collect(),
        })
    }

    pub async fn reconcile(&self, subscriber_id: Uuid, new_plan_id: Uuid) -> Res<DowngradeReport> {
        let preview = self.preview_downgrade(subscriber_id, new_plan_id).await?;
        if preview.excess_count == 0 {
            return Ok(DowngradeReport {
                disabled_count: 0,
                excess_count: 0,
            });
        }

        let mut disabled = 0;
        for listing_id in &preview.to_disable {
            self.listings.deactivate(*listing_id).await?;
            disabled += 1;
        }

        log::info!(
            "Downgrade of subscriber {} to plan {}: hid {} of {} public listings (limit {})",
            subscriber_id,
            new_plan_id,
            disabled,
            preview.current_listings,
            preview.new_max.unwrap_or_default()
        );

        Ok(DowngradeReport {
            disabled_count: disabled,
            excess_count: preview.excess_count,
        })
    }

    async fn plan(&self, id: Uuid) -> Res<Plan> {
        self.plans
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", id)))
    }

    // The store promises oldest-first; sorting again keeps "hide the oldest"
    // correct even if an implementation does not.
    async fn public_listings(&self, subscriber_id: Uuid) -> Res<Vec<Listing>> {
        let mut listings = self.listings.list_public_oldest_first(subscriber_id).await?;
        listings.retain(|l| l.is_public);
        listings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use db::{
        dtos::{listing::ListingCreateRequest, plan::PlanCreateRequest},
        memory::MemoryStore,
        models::plan::{BillingInterval, PlanFeatures, PlanTier},
    };

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
    }

    async fn plan(store: &MemoryStore, max_listings: i32) -> Plan {
        PlanStore::insert(
            store,
            PlanCreateRequest {
                name: format!("max {}", max_listings),
                tier: PlanTier::Basic,
                price: 900,
                currency: "usd".to_string(),
                billing_interval: BillingInterval::Month,
                features: PlanFeatures {
                    max_listings,
                    max_boosts: 1,
                    flags: BTreeMap::new(),
                },
                active: true,
            },
            t0(),
        )
        .await
        .unwrap()
    }

    async fn listings(store: &MemoryStore, subscriber_id: Uuid, count: i64) -> Vec<Listing> {
        let mut created = Vec::new();
        for i in 0..count {
            created.push(
                ListingStore::create(
                    store,
                    ListingCreateRequest {
                        subscriber_id,
                        title: format!("card {}", i),
                        created_at: t0() + Duration::days(i),
                    },
                )
                .await
                .unwrap(),
            );
        }
        created
    }

    #[tokio::test]
    async fn downgrade_hides_exactly_the_oldest_excess() {
        let store = Arc::new(MemoryStore::new());
        let subscriber = Uuid::new_v4();
        let created = listings(&store, subscriber, 8).await;
        let small = plan(&store, 5).await;
        let reconciler = DowngradeReconciler::new(store.clone(), store.clone());

        let report = reconciler.reconcile(subscriber, small.id).await.unwrap();
        assert_eq!(
            report,
            DowngradeReport {
                disabled_count: 3,
                excess_count: 3
            }
        );

        let after = store.listings_of(subscriber);
        assert_eq!(after.len(), 8);
        for (listing, before) in after.iter().zip(&created) {
            assert_eq!(listing.id, before.id);
        }
        assert!(after[..3].iter().all(|l| !l.is_public));
        assert!(after[3..].iter().all(|l| l.is_public));
    }

    #[tokio::test]
    async fn unlimited_or_roomy_plans_change_nothing() {
        let store = Arc::new(MemoryStore::new());
        let subscriber = Uuid::new_v4();
        listings(&store, subscriber, 4).await;
        let unlimited = plan(&store, PlanFeatures::UNLIMITED).await;
        let roomy = plan(&store, 4).await;
        let reconciler = DowngradeReconciler::new(store.clone(), store.clone());

        for target in [unlimited.id, roomy.id] {
            let report = reconciler.reconcile(subscriber, target).await.unwrap();
            assert_eq!(report.disabled_count, 0);
        }
        assert!(store.listings_of(subscriber).iter().all(|l| l.is_public));
    }

    #[tokio::test]
    async fn preview_does_not_mutate() {
        let store = Arc::new(MemoryStore::new());
        let subscriber = Uuid::new_v4();
        let created = listings(&store, subscriber, 6).await;
        let small = plan(&store, 2).await;
        let reconciler = DowngradeReconciler::new(store.clone(), store.clone());

        let preview = reconciler.preview_downgrade(subscriber, small.id).await.unwrap();
        assert_eq!(preview.excess_count, 4);
        assert_eq!(preview.new_max, Some(2));
        assert_eq!(
            preview.to_disable,
            created[..4].iter().map(|l| l.id).collect::<Vec<_>>()
        );
        assert!(store.listings_of(subscriber).iter().all(|l| l.is_public));
    }

    #[tokio::test]
    async fn missing_plan_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = DowngradeReconciler::new(store.clone(), store.clone());
        let result = reconciler.reconcile(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    /// Returns listings newest-first, breaking the documented ordering.
    struct ReversedListings(Arc<MemoryStore>);

    #[async_trait]
    impl ListingStore for ReversedListings {
        async fn create(&self, data: ListingCreateRequest) -> Res<Listing> {
            self.0.create(data).await
        }
        async fn get(&self, id: Uuid) -> Res<Option<Listing>> {
            ListingStore::get(&*self.0, id).await
        }
        async fn list_public_oldest_first(&self, subscriber_id: Uuid) -> Res<Vec<Listing>> {
            let mut listings = self.0.list_public_oldest_first(subscriber_id).await?;
            listings.reverse();
            Ok(listings)
        }
        async fn deactivate(&self, id: Uuid) -> Res<()> {
            self.0.deactivate(id).await
        }
    }

    #[tokio::test]
    async fn ordering_does_not_depend_on_the_listing_store() {
        let store = Arc::new(MemoryStore::new());
        let subscriber = Uuid::new_v4();
        let created = listings(&store, subscriber, 8).await;
        let small = plan(&store, 5).await;
        let reconciler =
            DowngradeReconciler::new(store.clone(), Arc::new(ReversedListings(store.clone())));

        reconciler.reconcile(subscriber, small.id).await.unwrap();

        let hidden: Vec<Uuid> = store
            .listings_of(subscriber)
            .into_iter()
            .filter(|l| !l.is_public)
            .map(|l| l.id)
            .collect();
        assert_eq!(hidden, created[..3].iter().map(|l| l.id).collect::<Vec<_>>());
    }
}
