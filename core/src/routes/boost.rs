use actix_web::{Responder, get, post, web};
use boost::BoostRequest;
use common::{error::Res, http::Success};
use uuid::Uuid;

use crate::services::Services;

#[post("")]
pub async fn post_boost(
    services: web::Data<Services>,
    req: web::Json<BoostRequest>,
) -> Res<impl Responder> {
    let req = req.into_inner();
    let boost = services
        .boosts
        .create_boost(req.subscriber_id, req.listing_id, req.duration_days)
        .await?;
    Success::created(boost)
}

#[post("/{boost_id}/expire")]
pub async fn post_expire(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.boosts.expire(path.into_inner()).await?)
}

#[post("/{boost_id}/impression")]
pub async fn post_impression(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.boosts.record_impression(path.into_inner()).await?)
}

#[post("/{boost_id}/click")]
pub async fn post_click(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.boosts.record_click(path.into_inner()).await?)
}

/// The live boost of a listing, or `null`.
#[get("/listing/{listing_id}")]
pub async fn get_for_listing(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(
        services
            .boosts
            .get_active_for_listing(path.into_inner())
            .await?,
    )
}

#[get("/subscriber/{subscriber_id}")]
pub async fn get_for_subscriber(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(
        services
            .boosts
            .get_active_for_subscriber(path.into_inner())
            .await?,
    )
}

pub fn mount() -> actix_web::Scope {
    web::scope("/boosts")
        .service(post_boost)
        .service(get_for_listing)
        .service(get_for_subscriber)
        .service(post_expire)
        .service(post_impression)
        .service(post_click)
}
