use std::sync::Arc;

use chrono::Duration;
use common::{
    clock::Clock,
    error::{AppError, Res},
};
use db::{
    boost::BoostStore,
    dtos::boost::BoostCreateRequest,
    listing::ListingStore,
    models::boost::{Boost, BoostMetric},
};
use serde::Deserialize;
use subs::services::usage::UsageLedger;
use uuid::Uuid;

pub const MIN_BOOST_DAYS: i32 = 1;
pub const MAX_BOOST_DAYS: i32 = 30;

#[derive(Debug, Deserialize)]
pub struct BoostRequest {
    pub subscriber_id: Uuid,
    pub listing_id: Uuid,
    pub duration_days: i32,
}

/// Time-limited promotions of a single listing. A listing carries at most one
/// live boost; the store enforces it, this type checks the rules around it.
pub struct BoostManager {
    boosts: Arc<dyn BoostStore>,
    listings: Arc<dyn ListingStore>,
    ledger: Arc<UsageLedger>,
    clock: Arc<dyn Clock>,
}

impl BoostManager {
    pub fn new(
        boosts: Arc<dyn BoostStore>,
        listings: Arc<dyn ListingStore>,
        ledger: Arc<UsageLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            boosts,
            listings,
            ledger,
            clock,
        }
    }

    pub async fn create_boost(
        &self,
        subscriber_id: Uuid,
        listing_id: Uuid,
        duration_days: i32,
    ) -> Res<Boost> {
        if !(MIN_BOOST_DAYS..=MAX_BOOST_DAYS).contains(&duration_days) {
            return Err(AppError::Validation(format!(
                "Boost duration must be between {} and {} days, got {}",
                MIN_BOOST_DAYS, MAX_BOOST_DAYS, duration_days
            )));
        }

        let listing = self
            .listings
            .get(listing_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("listing {}", listing_id)))?;
        if listing.subscriber_id != subscriber_id {
            return Err(AppError::Forbidden(format!(
                "Listing {} does not belong to subscriber {}",
                listing_id, subscriber_id
            )));
        }

        let now = self.clock.now();
        if let Some(live) = self.boosts.find_live_for_listing(listing_id, now).await? {
            return Err(AppError::Conflict(format!(
                "Listing {} is already boosted until {}",
                listing_id, live.end_date
            )));
        }

        self.ledger.check_and_reserve_boost(subscriber_id).await?;

        let inserted = self
            .boosts
            .insert_active(
                BoostCreateRequest {
                    listing_id,
                    subscriber_id,
                    duration_days,
                    start_date: now,
                    end_date: now + Duration::days(i64::from(duration_days)),
                },
                now,
            )
            .await;

        let boost = match inserted {
            Ok(Some(boost)) => boost,
            Ok(None) => {
                self.give_back(subscriber_id).await;
                return Err(AppError::Conflict(format!(
                    "Listing {} was boosted concurrently",
                    listing_id
                )));
            }
            Err(e) => {
                self.give_back(subscriber_id).await;
                return Err(e);
            }
        };

        log::info!(
            "Listing {} boosted for {} days until {}",
            listing_id,
            duration_days,
            boost.end_date
        );
        Ok(boost)
    }

    /// Marks a boost expired. Expiring an expired boost is a no-op.
    pub async fn expire(&self, boost_id: Uuid) -> Res<Boost> {
        self.boosts
            .expire(boost_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("boost {}", boost_id)))
    }

    pub async fn get_active_for_subscriber(&self, subscriber_id: Uuid) -> Res<Vec<Boost>> {
        self.boosts
            .list_live_for_subscriber(subscriber_id, self.clock.now())
            .await
    }

    pub async fn get_active_for_listing(&self, listing_id: Uuid) -> Res<Option<Boost>> {
        self.boosts
            .find_live_for_listing(listing_id, self.clock.now())
            .await
    }

    pub async fn record_impression(&self, boost_id: Uuid) -> Res<Boost> {
        self.record(boost_id, BoostMetric::Impression).await
    }

    pub async fn record_click(&self, boost_id: Uuid) -> Res<Boost> {
        self.record(boost_id, BoostMetric::Click).await
    }

    // Traffic on a boost that is no longer live is not counted.
    async fn record(&self, boost_id: Uuid, metric: BoostMetric) -> Res<Boost> {
        let boost = self
            .boosts
            .get(boost_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("boost {}", boost_id)))?;
        if !boost.is_live(self.clock.now()) {
            return Ok(boost);
        }

        self.boosts
            .record(boost_id, metric)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("boost {}", boost_id)))
    }

    async fn give_back(&self, subscriber_id: Uuid) {
        if let Err(e) = self.ledger.release_boost(subscriber_id).await {
            log::error!(
                "Could not release boost reservation of {}: {}",
                subscriber_id,
                e
            );
        }
    }
}
