use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    clock::Clock,
    error::{AppError, Res},
    misc::{add_months, limit_label},
    notify::{Notification, Notifier, dispatch},
};
use db::{
    dtos::listing::ListingCreateRequest,
    listing::ListingStore,
    models::{
        listing::Listing,
        plan::Plan,
        usage::{ReserveOutcome, UsageCounter, UsagePeriod},
    },
    plan::PlanStore,
    subscription::SubscriptionStore,
    usage::UsageStore,
};
use uuid::Uuid;

use crate::dtos::usage::{ListingDraft, UsageSummary};

/// Per-subscriber quota counters. Every reservation is a single conditional
/// increment in the usage store, so concurrent callers can never push a
/// counter past the plan limit.
pub struct UsageLedger {
    usage: Arc<dyn UsageStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    plans: Arc<dyn PlanStore>,
    listings: Arc<dyn ListingStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl UsageLedger {
    pub fn new(
        usage: Arc<dyn UsageStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        plans: Arc<dyn PlanStore>,
        listings: Arc<dyn ListingStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            usage,
            subscriptions,
            plans,
            listings,
            notifier,
            clock,
        }
    }

    /// Returns the subscriber's usage period, opening a one-month window from
    /// now with zeroed counters if there is none yet.
    pub async fn ensure(&self, subscriber_id: Uuid, plan_id: Uuid) -> Res<UsagePeriod> {
        let now = self.clock.now();
        self.usage
            .ensure(subscriber_id, plan_id, now, add_months(now, 1))
            .await
    }

    pub async fn check_and_reserve_listing(&self, subscriber_id: Uuid) -> Res<UsagePeriod> {
        self.reserve(subscriber_id, UsageCounter::Listings).await
    }

    pub async fn check_and_reserve_boost(&self, subscriber_id: Uuid) -> Res<UsagePeriod> {
        self.reserve(subscriber_id, UsageCounter::Boosts).await
    }

    pub async fn release_listing(&self, subscriber_id: Uuid) -> Res<()> {
        self.release(subscriber_id, UsageCounter::Listings).await
    }

    pub async fn release_boost(&self, subscriber_id: Uuid) -> Res<()> {
        self.release(subscriber_id, UsageCounter::Boosts).await
    }

    /// Zeroes the boost counter and rolls the window forward in whole months
    /// until it starts after `now`. Returns `None` when the window already
    /// starts after `now` or was rolled concurrently, so re-running the
    /// monthly sweep any time before the next window opens is a no-op.
    pub async fn reset_period_counters(
        &self,
        subscriber_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        let period = self.period(subscriber_id).await?;
        if period.period_start > now {
            return Ok(None);
        }

        let mut start = period.period_end;
        while start <= now {
            start = add_months(start, 1);
        }

        self.usage
            .reset_period(subscriber_id, period.period_start, start, add_months(start, 1))
            .await
    }

    /// Points the usage period at another plan. Counters are kept.
    pub async fn rebind(&self, subscriber_id: Uuid, plan_id: Uuid) -> Res<UsagePeriod> {
        self.usage
            .set_plan(subscriber_id, plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("usage period for {}", subscriber_id)))
    }

    pub async fn summary(&self, subscriber_id: Uuid) -> Res<UsageSummary> {
        let plan = self.active_plan(subscriber_id).await?;
        let period = self.period(subscriber_id).await?;

        let max_listings = plan.features.listing_limit();
        let max_boosts = plan.features.boost_limit();
        Ok(UsageSummary {
            subscriber_id,
            plan_id: plan.id,
            listings_created: period.listings_created,
            max_listings,
            listings_remaining: max_listings.map(|max| (max - period.listings_created).max(0)),
            boosts_used: period.boosts_used,
            max_boosts,
            boosts_remaining: max_boosts.map(|max| (max - period.boosts_used).max(0)),
            period_start: period.period_start,
            period_end: period.period_end,
        })
    }

    /// Reserves listing quota and creates the listing. The reservation is
    /// given back if the listing store refuses the listing.
    pub async fn create_listing(&self, subscriber_id: Uuid, draft: ListingDraft) -> Res<Listing> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation(
                "Listing title must not be empty".to_string(),
            ));
        }

        self.check_and_reserve_listing(subscriber_id).await?;

        let created = self
            .listings
            .create(ListingCreateRequest {
                subscriber_id,
                title: title.to_string(),
                created_at: self.clock.now(),
            })
            .await;

        match created {
            Ok(listing) => Ok(listing),
            Err(e) => {
                if let Err(release_err) = self.release_listing(subscriber_id).await {
                    log::error!(
                        "Could not release listing reservation of {} after failed create: {}",
                        subscriber_id,
                        release_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn reserve(&self, subscriber_id: Uuid, counter: UsageCounter) -> Res<UsagePeriod> {
        let plan = self.active_plan(subscriber_id).await?;
        let limit = match counter {
            UsageCounter::Listings => plan.features.listing_limit(),
            UsageCounter::Boosts => plan.features.boost_limit(),
        };

        match self.usage.try_reserve(subscriber_id, counter, limit).await? {
            ReserveOutcome::Reserved(period) => {
                log::debug!(
                    "Reserved {} for {}: {}/{}",
                    counter.resource(),
                    subscriber_id,
                    period.value(counter),
                    limit_label(limit.unwrap_or(-1))
                );
                Ok(period)
            }
            ReserveOutcome::LimitReached(period) => {
                let limit = limit.unwrap_or_default();
                dispatch(
                    &self.notifier,
                    Notification::LimitReached {
                        subscriber_id,
                        resource: counter.resource(),
                        limit,
                    },
                );
                Err(AppError::QuotaExceeded(format!(
                    "{} limit reached ({}/{}) on plan {}",
                    counter.resource(),
                    period.value(counter),
                    limit,
                    plan.name
                )))
            }
            ReserveOutcome::Missing => Err(AppError::NotFound(format!(
                "usage period for {}",
                subscriber_id
            ))),
        }
    }

    async fn release(&self, subscriber_id: Uuid, counter: UsageCounter) -> Res<()> {
        self.usage
            .release(subscriber_id, counter)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("usage period for {}", subscriber_id)))?;
        Ok(())
    }

    async fn period(&self, subscriber_id: Uuid) -> Res<UsagePeriod> {
        self.usage
            .get(subscriber_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("usage period for {}", subscriber_id)))
    }

    async fn active_plan(&self, subscriber_id: Uuid) -> Res<Plan> {
        let subscription = self
            .subscriptions
            .get_active(subscriber_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("active subscription for {}", subscriber_id))
            })?;

        self.plans
            .get(subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan {}", subscription.plan_id)))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use db::{memory::MemoryStore, usage::UsageStore};
    use futures::future::join_all;

    use super::*;
    use crate::testing::{Harness, t0};

    async fn subscribed(h: &Harness, max_listings: i32, max_boosts: i32) -> Uuid {
        let plan = h.plan(0, max_listings, max_boosts).await;
        let subscriber = Uuid::new_v4();
        h.manager.subscribe(subscriber, plan.id, None).await.unwrap();
        subscriber
    }

    #[tokio::test]
    async fn sixth_listing_is_refused_without_side_effects() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 5, 1).await;

        for i in 0..5 {
            h.ledger
                .create_listing(
                    subscriber,
                    ListingDraft {
                        title: format!("listing {}", i),
                    },
                )
                .await
                .unwrap();
        }

        let sixth = h
            .ledger
            .create_listing(
                subscriber,
                ListingDraft {
                    title: "one too many".to_string(),
                },
            )
            .await;
        assert!(matches!(sixth, Err(AppError::QuotaExceeded(_))));

        let period = UsageStore::get(&*h.store, subscriber).await.unwrap().unwrap();
        assert_eq!(period.listings_created, 5);
        assert_eq!(h.store.listings_of(subscriber).len(), 5);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overshoot() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 3, 2).await;

        let listings = join_all((0..10).map(|_| h.ledger.check_and_reserve_listing(subscriber))).await;
        let boosts = join_all((0..10).map(|_| h.ledger.check_and_reserve_boost(subscriber))).await;

        assert_eq!(listings.iter().filter(|r| r.is_ok()).count(), 3);
        assert_eq!(boosts.iter().filter(|r| r.is_ok()).count(), 2);
        assert!(
            listings
                .iter()
                .chain(&boosts)
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, AppError::QuotaExceeded(_)))
        );

        let period = UsageStore::get(&*h.store, subscriber).await.unwrap().unwrap();
        assert_eq!(period.listings_created, 3);
        assert_eq!(period.boosts_used, 2);
    }

    #[tokio::test]
    async fn unlimited_plan_never_refuses() {
        let h = Harness::new();
        let subscriber = subscribed(&h, -1, -1).await;
        for _ in 0..50 {
            h.ledger.check_and_reserve_listing(subscriber).await.unwrap();
        }
        let summary = h.ledger.summary(subscriber).await.unwrap();
        assert_eq!(summary.listings_created, 50);
        assert_eq!(summary.max_listings, None);
        assert_eq!(summary.listings_remaining, None);
    }

    #[tokio::test]
    async fn reserving_without_a_subscription_is_not_found() {
        let h = Harness::new();
        let result = h.ledger.check_and_reserve_boost(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn ensure_keeps_existing_counters() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 5, 5).await;
        h.ledger.check_and_reserve_listing(subscriber).await.unwrap();

        h.clock.advance(Duration::days(3));
        let plan_id = h.manager.get_active(subscriber).await.unwrap().plan_id;
        let period = h.ledger.ensure(subscriber, plan_id).await.unwrap();

        assert_eq!(period.listings_created, 1);
        assert_eq!(period.period_start, t0());
    }

    #[tokio::test]
    async fn reset_clears_boosts_only_and_is_idempotent() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 5, 5).await;
        h.ledger.check_and_reserve_listing(subscriber).await.unwrap();
        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();
        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();

        let now = t0() + Duration::days(22);
        let reset = h
            .ledger
            .reset_period_counters(subscriber, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reset.boosts_used, 0);
        assert_eq!(reset.listings_created, 1);
        assert_eq!(reset.period_start, add_months(t0(), 1));
        assert_eq!(reset.period_end, add_months(t0(), 2));

        let again = h.ledger.reset_period_counters(subscriber, now).await.unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn reset_on_the_first_runs_once_for_a_window_ending_that_night() {
        let h = Harness::new();
        let june_1 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        h.clock.set(june_1);
        let subscriber = subscribed(&h, 5, 2).await;

        let sweep = Utc.with_ymd_and_hms(2025, 7, 1, 3, 0, 0).unwrap();
        let first = h
            .ledger
            .reset_period_counters(subscriber, sweep)
            .await
            .unwrap()
            .unwrap();
        assert!(first.period_start > sweep);
        assert_eq!(first.period_start, Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap());
        assert_eq!(first.period_end, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());

        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();
        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();

        let rerun = sweep + Duration::hours(7);
        let second = h.ledger.reset_period_counters(subscriber, rerun).await.unwrap();
        assert_eq!(second, None);

        let period = UsageStore::get(&*h.store, subscriber).await.unwrap().unwrap();
        assert_eq!(period.boosts_used, 2);
        assert_eq!(period.period_start, first.period_start);
    }

    #[tokio::test]
    async fn reset_skips_a_window_rolled_by_someone_else() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 5, 5).await;
        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();

        let stale = t0() - Duration::days(1);
        let moved = UsageStore::reset_period(
            &*h.store,
            subscriber,
            stale,
            add_months(t0(), 1),
            add_months(t0(), 2),
        )
        .await
        .unwrap();
        assert_eq!(moved, None);

        let period = UsageStore::get(&*h.store, subscriber).await.unwrap().unwrap();
        assert_eq!(period.boosts_used, 1);
        assert_eq!(period.period_start, t0());
    }

    #[tokio::test]
    async fn summary_reports_remaining_quota() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 4, 2).await;
        h.ledger.check_and_reserve_listing(subscriber).await.unwrap();
        h.ledger.check_and_reserve_boost(subscriber).await.unwrap();
        h.ledger.release_boost(subscriber).await.unwrap();
        h.ledger.release_boost(subscriber).await.unwrap();

        let summary = h.ledger.summary(subscriber).await.unwrap();
        assert_eq!(summary.listings_remaining, Some(3));
        assert_eq!(summary.boosts_used, 0);
        assert_eq!(summary.boosts_remaining, Some(2));
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_reserving() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 5, 5).await;
        let result = h
            .ledger
            .create_listing(
                subscriber,
                ListingDraft {
                    title: "   ".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(h.ledger.summary(subscriber).await.unwrap().listings_created, 0);
    }

    /// Listing store that refuses every new listing.
    struct BrokenListings(Arc<MemoryStore>);

    #[async_trait]
    impl ListingStore for BrokenListings {
        async fn create(&self, _data: ListingCreateRequest) -> Res<Listing> {
            Err(AppError::Storage("listing backend unavailable".to_string()))
        }
        async fn get(&self, id: Uuid) -> Res<Option<Listing>> {
            ListingStore::get(&*self.0, id).await
        }
        async fn list_public_oldest_first(&self, subscriber_id: Uuid) -> Res<Vec<Listing>> {
            self.0.list_public_oldest_first(subscriber_id).await
        }
        async fn deactivate(&self, id: Uuid) -> Res<()> {
            self.0.deactivate(id).await
        }
    }

    #[tokio::test]
    async fn failed_listing_create_gives_the_reservation_back() {
        let h = Harness::new();
        let subscriber = subscribed(&h, 1, 1).await;
        let ledger = UsageLedger::new(
            h.store.clone(),
            h.store.clone(),
            h.store.clone(),
            Arc::new(BrokenListings(h.store.clone())),
            Arc::new(common::notify::LogNotifier),
            h.clock.clone(),
        );

        let result = ledger
            .create_listing(
                subscriber,
                ListingDraft {
                    title: "lost".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Storage(_))));
        assert_eq!(ledger.summary(subscriber).await.unwrap().listings_created, 0);

        // the single allowed listing is still available
        h.ledger.check_and_reserve_listing(subscriber).await.unwrap();
    }
}
