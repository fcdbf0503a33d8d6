//! In-process implementation of every store, for tests and for running the
//! engine without PostgreSQL. Compound checks (one active subscription, one
//! live boost per listing, conditional increments) hold a single lock or map
//! entry for their whole duration, matching the atomicity of the SQL stores.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{AppError, Res};
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    boost::BoostStore,
    dtos::{
        boost::BoostCreateRequest, listing::ListingCreateRequest, plan::PlanCreateRequest,
        plan::PlanUpdateRequest, subscription::SubscriptionCreateRequest,
    },
    listing::ListingStore,
    models::{
        boost::{Boost, BoostMetric, BoostStatus},
        listing::Listing,
        plan::Plan,
        subscription::{Subscription, SubscriptionStatus},
        usage::{ReserveOutcome, UsageCounter, UsagePeriod},
    },
    plan::PlanStore,
    subscription::SubscriptionStore,
    usage::UsageStore,
};

#[derive(Default)]
pub struct MemoryStore {
    plans: DashMap<Uuid, Plan>,
    subscriptions: Mutex<Vec<Subscription>>,
    usage: DashMap<Uuid, UsagePeriod>,
    boosts: Mutex<Vec<Boost>>,
    listings: DashMap<Uuid, Listing>,
}

fn lock<T>(mutex: &Mutex<T>) -> Res<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AppError::Storage("in-memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subscription ever stored for a subscriber, in insertion order.
    pub fn subscriptions_of(&self, subscriber_id: Uuid) -> Vec<Subscription> {
        lock(&self.subscriptions)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.subscriber_id == subscriber_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every boost ever stored for a listing, in insertion order.
    pub fn boosts_of(&self, listing_id: Uuid) -> Vec<Boost> {
        lock(&self.boosts)
            .map(|boosts| {
                boosts
                    .iter()
                    .filter(|b| b.listing_id == listing_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All listings of a subscriber, public or not, oldest first.
    pub fn listings_of(&self, subscriber_id: Uuid) -> Vec<Listing> {
        let mut listings: Vec<Listing> = self
            .listings
            .iter()
            .filter(|l| l.subscriber_id == subscriber_id)
            .map(|l| l.value().clone())
            .collect();
        listings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        listings
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn insert(&self, data: PlanCreateRequest, now: DateTime<Utc>) -> Res<Plan> {
        let plan = Plan {
            id: Uuid::new_v4(),
            name: data.name,
            tier: data.tier,
            price: data.price,
            currency: data.currency,
            billing_interval: data.billing_interval,
            features: data.features,
            active: data.active,
            scheduled_activate_at: None,
            scheduled_deactivate_at: None,
            created_at: now,
            updated_at: now,
        };
        self.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Plan>> {
        Ok(self.plans.get(&id).map(|p| p.value().clone()))
    }

    async fn list(&self, include_inactive: bool) -> Res<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| include_inactive || p.active)
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then(a.price.cmp(&b.price))
                .then(a.name.cmp(&b.name))
        });
        Ok(plans)
    }

    async fn update(
        &self,
        id: Uuid,
        patch: PlanUpdateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Plan>> {
        let Some(mut plan) = self.plans.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            plan.name = name;
        }
        if let Some(tier) = patch.tier {
            plan.tier = tier;
        }
        if let Some(price) = patch.price {
            plan.price = price;
        }
        if let Some(currency) = patch.currency {
            plan.currency = currency;
        }
        if let Some(interval) = patch.billing_interval {
            plan.billing_interval = interval;
        }
        if let Some(features) = patch.features {
            plan.features = features;
        }
        if let Some(active) = patch.active {
            plan.active = active;
        }
        if let Some(at) = patch.scheduled_activate_at {
            plan.scheduled_activate_at = at;
        }
        if let Some(at) = patch.scheduled_deactivate_at {
            plan.scheduled_deactivate_at = at;
        }
        plan.updated_at = now;
        Ok(Some(plan.clone()))
    }

    async fn delete(&self, id: Uuid) -> Res<bool> {
        Ok(self.plans.remove(&id).is_some())
    }

    async fn list_schedule_due(&self, now: DateTime<Utc>) -> Res<Vec<Plan>> {
        let due = |at: Option<DateTime<Utc>>| at.is_some_and(|at| at <= now);
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| due(p.scheduled_activate_at) || due(p.scheduled_deactivate_at))
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by_key(|p| {
            [p.scheduled_activate_at, p.scheduled_deactivate_at]
                .into_iter()
                .flatten()
                .min()
        });
        Ok(plans)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert_active(
        &self,
        data: SubscriptionCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        let mut subs = lock(&self.subscriptions)?;
        if subs
            .iter()
            .any(|s| s.subscriber_id == data.subscriber_id && s.is_active())
        {
            return Ok(None);
        }
        let sub = Subscription {
            id: Uuid::new_v4(),
            subscriber_id: data.subscriber_id,
            plan_id: data.plan_id,
            status: SubscriptionStatus::Active,
            current_period_start: data.period_start,
            current_period_end: data.period_end,
            cancel_at_period_end: false,
            payment_method_id: data.payment_method_id,
            created_at: now,
            updated_at: now,
        };
        subs.push(sub.clone());
        Ok(Some(sub))
    }

    async fn get(&self, id: Uuid) -> Res<Option<Subscription>> {
        Ok(lock(&self.subscriptions)?.iter().find(|s| s.id == id).cloned())
    }

    async fn get_active(&self, subscriber_id: Uuid) -> Res<Option<Subscription>> {
        Ok(lock(&self.subscriptions)?
            .iter()
            .find(|s| s.subscriber_id == subscriber_id && s.is_active())
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        let mut subs = lock(&self.subscriptions)?;
        Ok(subs
            .iter_mut()
            .find(|s| s.id == id && s.status == from)
            .map(|s| {
                s.status = to;
                s.updated_at = now;
                s.clone()
            }))
    }

    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel: bool,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        let mut subs = lock(&self.subscriptions)?;
        Ok(subs
            .iter_mut()
            .find(|s| s.id == id && s.is_active())
            .map(|s| {
                s.cancel_at_period_end = cancel;
                s.updated_at = now;
                s.clone()
            }))
    }

    async fn extend_period(
        &self,
        id: Uuid,
        expected_end: DateTime<Utc>,
        new_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        let mut subs = lock(&self.subscriptions)?;
        Ok(subs
            .iter_mut()
            .find(|s| s.id == id && s.is_active() && s.current_period_end == expected_end)
            .map(|s| {
                s.current_period_start = s.current_period_end;
                s.current_period_end = new_end;
                s.updated_at = now;
                s.clone()
            }))
    }

    async fn change_plan(
        &self,
        id: Uuid,
        plan_id: Uuid,
        payment_method_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Res<Option<Subscription>> {
        let mut subs = lock(&self.subscriptions)?;
        Ok(subs
            .iter_mut()
            .find(|s| s.id == id && s.is_active())
            .map(|s| {
                s.plan_id = plan_id;
                if payment_method_id.is_some() {
                    s.payment_method_id = payment_method_id;
                }
                s.updated_at = now;
                s.clone()
            }))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Res<Vec<Subscription>> {
        let mut due: Vec<Subscription> = lock(&self.subscriptions)?
            .iter()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        Ok(due)
    }

    async fn list_ending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Res<Vec<Subscription>> {
        let mut ending: Vec<Subscription> = lock(&self.subscriptions)?
            .iter()
            .filter(|s| {
                s.is_active()
                    && !s.cancel_at_period_end
                    && s.current_period_end > from
                    && s.current_period_end <= to
            })
            .cloned()
            .collect();
        ending.sort_by_key(|s| s.current_period_end);
        Ok(ending)
    }

    async fn list_active(&self) -> Res<Vec<Subscription>> {
        Ok(lock(&self.subscriptions)?
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    async fn count_active_for_plan(&self, plan_id: Uuid) -> Res<i64> {
        Ok(lock(&self.subscriptions)?
            .iter()
            .filter(|s| s.plan_id == plan_id && s.is_active())
            .count() as i64)
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn ensure(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<UsagePeriod> {
        Ok(self
            .usage
            .entry(subscriber_id)
            .or_insert_with(|| UsagePeriod {
                subscriber_id,
                plan_id,
                listings_created: 0,
                boosts_used: 0,
                period_start,
                period_end,
            })
            .clone())
    }

    async fn get(&self, subscriber_id: Uuid) -> Res<Option<UsagePeriod>> {
        Ok(self.usage.get(&subscriber_id).map(|u| u.value().clone()))
    }

    async fn try_reserve(
        &self,
        subscriber_id: Uuid,
        counter: UsageCounter,
        limit: Option<i32>,
    ) -> Res<ReserveOutcome> {
        let Some(mut period) = self.usage.get_mut(&subscriber_id) else {
            return Ok(ReserveOutcome::Missing);
        };
        if limit.is_some_and(|limit| UsagePeriod::value(&period, counter) >= limit) {
            return Ok(ReserveOutcome::LimitReached(period.clone()));
        }
        match counter {
            UsageCounter::Listings => period.listings_created += 1,
            UsageCounter::Boosts => period.boosts_used += 1,
        }
        Ok(ReserveOutcome::Reserved(period.clone()))
    }

    async fn release(
        &self,
        subscriber_id: Uuid,
        counter: UsageCounter,
    ) -> Res<Option<UsagePeriod>> {
        Ok(self.usage.get_mut(&subscriber_id).map(|mut period| {
            match counter {
                UsageCounter::Listings => {
                    period.listings_created = (period.listings_created - 1).max(0)
                }
                UsageCounter::Boosts => period.boosts_used = (period.boosts_used - 1).max(0),
            }
            period.clone()
        }))
    }

    async fn reset_period(
        &self,
        subscriber_id: Uuid,
        expected_start: DateTime<Utc>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Res<Option<UsagePeriod>> {
        let Some(mut period) = self.usage.get_mut(&subscriber_id) else {
            return Ok(None);
        };
        if period.period_start != expected_start {
            return Ok(None);
        }
        period.boosts_used = 0;
        period.period_start = period_start;
        period.period_end = period_end;
        Ok(Some(period.clone()))
    }

    async fn set_plan(&self, subscriber_id: Uuid, plan_id: Uuid) -> Res<Option<UsagePeriod>> {
        Ok(self.usage.get_mut(&subscriber_id).map(|mut period| {
            period.plan_id = plan_id;
            period.clone()
        }))
    }
}

#[async_trait]
impl BoostStore for MemoryStore {
    async fn insert_active(
        &self,
        data: BoostCreateRequest,
        now: DateTime<Utc>,
    ) -> Res<Option<Boost>> {
        let mut boosts = lock(&self.boosts)?;
        for boost in boosts
            .iter_mut()
            .filter(|b| b.listing_id == data.listing_id && b.is_lapsed(now))
        {
            boost.status = BoostStatus::Expired;
        }
        if boosts
            .iter()
            .any(|b| b.listing_id == data.listing_id && b.status == BoostStatus::Active)
        {
            return Ok(None);
        }
        let boost = Boost {
            id: Uuid::new_v4(),
            listing_id: data.listing_id,
            subscriber_id: data.subscriber_id,
            duration_days: data.duration_days,
            start_date: data.start_date,
            end_date: data.end_date,
            status: BoostStatus::Active,
            impressions: 0,
            clicks: 0,
            created_at: now,
        };
        boosts.push(boost.clone());
        Ok(Some(boost))
    }

    async fn get(&self, id: Uuid) -> Res<Option<Boost>> {
        Ok(lock(&self.boosts)?.iter().find(|b| b.id == id).cloned())
    }

    async fn expire(&self, id: Uuid) -> Res<Option<Boost>> {
        let mut boosts = lock(&self.boosts)?;
        Ok(boosts.iter_mut().find(|b| b.id == id).map(|b| {
            b.status = BoostStatus::Expired;
            b.clone()
        }))
    }

    async fn find_live_for_listing(
        &self,
        listing_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Option<Boost>> {
        Ok(lock(&self.boosts)?
            .iter()
            .find(|b| b.listing_id == listing_id && b.is_live(now))
            .cloned())
    }

    async fn list_live_for_subscriber(
        &self,
        subscriber_id: Uuid,
        now: DateTime<Utc>,
    ) -> Res<Vec<Boost>> {
        let mut live: Vec<Boost> = lock(&self.boosts)?
            .iter()
            .filter(|b| b.subscriber_id == subscriber_id && b.is_live(now))
            .cloned()
            .collect();
        live.sort_by_key(|b| b.end_date);
        Ok(live)
    }

    async fn list_lapsed(&self, now: DateTime<Utc>) -> Res<Vec<Boost>> {
        let mut lapsed: Vec<Boost> = lock(&self.boosts)?
            .iter()
            .filter(|b| b.is_lapsed(now))
            .cloned()
            .collect();
        lapsed.sort_by_key(|b| b.end_date);
        Ok(lapsed)
    }

    async fn record(&self, id: Uuid, metric: BoostMetric) -> Res<Option<Boost>> {
        let mut boosts = lock(&self.boosts)?;
        Ok(boosts.iter_mut().find(|b| b.id == id).map(|b| {
            match metric {
                BoostMetric::Impression => b.impressions += 1,
                BoostMetric::Click => b.clicks += 1,
            }
            b.clone()
        }))
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn create(&self, data: ListingCreateRequest) -> Res<Listing> {
        let listing = Listing {
            id: Uuid::new_v4(),
            subscriber_id: data.subscriber_id,
            title: data.title,
            is_public: true,
            created_at: data.created_at,
        };
        self.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get(&self, id: Uuid) -> Res<Option<Listing>> {
        Ok(self.listings.get(&id).map(|l| l.value().clone()))
    }

    async fn list_public_oldest_first(&self, subscriber_id: Uuid) -> Res<Vec<Listing>> {
        Ok(self
            .listings_of(subscriber_id)
            .into_iter()
            .filter(|l| l.is_public)
            .collect())
    }

    async fn deactivate(&self, id: Uuid) -> Res<()> {
        match self.listings.get_mut(&id) {
            Some(mut listing) => {
                listing.is_public = false;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("listing {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = MemoryStore::new();
        let subscriber = Uuid::new_v4();
        let first = UsageStore::ensure(&store, subscriber, Uuid::new_v4(), t0(), t0())
            .await
            .unwrap();
        store
            .try_reserve(subscriber, UsageCounter::Listings, None)
            .await
            .unwrap();
        let second = UsageStore::ensure(&store, subscriber, Uuid::new_v4(), t0(), t0())
            .await
            .unwrap();
        assert_eq!(second.plan_id, first.plan_id);
        assert_eq!(second.listings_created, 1);
    }

    #[tokio::test]
    async fn reserve_stops_at_limit() {
        let store = MemoryStore::new();
        let subscriber = Uuid::new_v4();
        assert_eq!(
            store
                .try_reserve(subscriber, UsageCounter::Boosts, Some(1))
                .await
                .unwrap(),
            ReserveOutcome::Missing
        );
        UsageStore::ensure(&store, subscriber, Uuid::new_v4(), t0(), t0()).await.unwrap();
        assert!(matches!(
            store.try_reserve(subscriber, UsageCounter::Boosts, Some(1)).await.unwrap(),
            ReserveOutcome::Reserved(p) if p.boosts_used == 1
        ));
        assert!(matches!(
            store.try_reserve(subscriber, UsageCounter::Boosts, Some(1)).await.unwrap(),
            ReserveOutcome::LimitReached(p) if p.boosts_used == 1
        ));
        let released = store.release(subscriber, UsageCounter::Boosts).await.unwrap().unwrap();
        assert_eq!(released.boosts_used, 0);
        let floor = store.release(subscriber, UsageCounter::Boosts).await.unwrap().unwrap();
        assert_eq!(floor.boosts_used, 0);
    }

    #[tokio::test]
    async fn second_active_subscription_is_refused() {
        let store = MemoryStore::new();
        let subscriber = Uuid::new_v4();
        let request = || SubscriptionCreateRequest {
            subscriber_id: subscriber,
            plan_id: Uuid::new_v4(),
            payment_method_id: None,
            period_start: t0(),
            period_end: t0() + Duration::days(30),
        };
        let first = SubscriptionStore::insert_active(&store, request(), t0())
            .await
            .unwrap()
            .unwrap();
        assert!(
            SubscriptionStore::insert_active(&store, request(), t0())
                .await
                .unwrap()
                .is_none()
        );

        store
            .transition(first.id, SubscriptionStatus::Active, SubscriptionStatus::Cancelled, t0())
            .await
            .unwrap();
        assert!(
            SubscriptionStore::insert_active(&store, request(), t0())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(store.subscriptions_of(subscriber).len(), 2);
    }

    #[tokio::test]
    async fn lapsed_boost_does_not_block_a_new_one() {
        let store = MemoryStore::new();
        let listing = Uuid::new_v4();
        let request = |start: DateTime<Utc>| BoostCreateRequest {
            listing_id: listing,
            subscriber_id: Uuid::new_v4(),
            duration_days: 1,
            start_date: start,
            end_date: start + Duration::days(1),
        };
        let old = BoostStore::insert_active(&store, request(t0()), t0())
            .await
            .unwrap()
            .unwrap();
        assert!(
            BoostStore::insert_active(&store, request(t0()), t0())
                .await
                .unwrap()
                .is_none()
        );

        let later = t0() + Duration::days(2);
        let fresh = BoostStore::insert_active(&store, request(later), later)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(fresh.id, old.id);
        let old = BoostStore::get(&store, old.id).await.unwrap().unwrap();
        assert_eq!(old.status, BoostStatus::Expired);
    }
}
