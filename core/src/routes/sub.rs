use actix_web::{Responder, get, post, web};
use common::{error::Res, http::Success};
use subs::dtos::{
    sub::{ChangePlanRequest, SubscribeRequest, UpdateAutoRenewRequest},
    usage::ListingDraft,
};
use uuid::Uuid;

use crate::services::Services;

#[post("")]
pub async fn post_subscribe(
    services: web::Data<Services>,
    req: web::Json<SubscribeRequest>,
) -> Res<impl Responder> {
    let req = req.into_inner();
    let subscription = services
        .subscriptions
        .subscribe(req.subscriber_id, req.plan_id, req.payment_method_id)
        .await?;
    Success::created(subscription)
}

#[get("/{subscriber_id}")]
pub async fn get_current(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.subscriptions.get_active(path.into_inner()).await?)
}

/// `?immediate=true` ends the subscription now; otherwise it runs until the
/// end of the paid period.
#[post("/{subscriber_id}/cancel")]
pub async fn post_cancel(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    query: web::Query<subs::dtos::sub::CancelRequest>,
) -> Res<impl Responder> {
    let subscription = services
        .subscriptions
        .cancel(path.into_inner(), query.immediate)
        .await?;
    Success::ok(subscription)
}

#[post("/{subscriber_id}/auto-renew")]
pub async fn post_auto_renew(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    req: web::Json<UpdateAutoRenewRequest>,
) -> Res<impl Responder> {
    let subscription = services
        .subscriptions
        .set_auto_renew(path.into_inner(), req.auto_renew)
        .await?;
    Success::ok(subscription)
}

#[post("/{subscriber_id}/plan")]
pub async fn post_change_plan(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    req: web::Json<ChangePlanRequest>,
) -> Res<impl Responder> {
    let req = req.into_inner();
    let change = services
        .subscriptions
        .change_plan(path.into_inner(), req.plan_id, req.payment_method_id)
        .await?;
    Success::ok(change)
}

/// What moving to another plan would hide, without changing anything.
#[get("/{subscriber_id}/downgrade/{plan_id}")]
pub async fn get_downgrade_preview(
    services: web::Data<Services>,
    path: web::Path<(Uuid, Uuid)>,
) -> Res<impl Responder> {
    let (subscriber_id, plan_id) = path.into_inner();
    let preview = services
        .reconciler
        .preview_downgrade(subscriber_id, plan_id)
        .await?;
    Success::ok(preview)
}

#[get("/{subscriber_id}")]
pub async fn get_usage(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.ledger.summary(path.into_inner()).await?)
}

/// Creates a listing against the subscriber's listing quota. 429 once the
/// plan limit is reached.
#[post("/{subscriber_id}/listings")]
pub async fn post_listing(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    req: web::Json<ListingDraft>,
) -> Res<impl Responder> {
    let listing = services
        .ledger
        .create_listing(path.into_inner(), req.into_inner())
        .await?;
    Success::created(listing)
}

pub fn mount_subscriptions() -> actix_web::Scope {
    web::scope("/subscriptions")
        .service(post_subscribe)
        .service(get_current)
        .service(post_cancel)
        .service(post_auto_renew)
        .service(post_change_plan)
        .service(get_downgrade_preview)
}

pub fn mount_usage() -> actix_web::Scope {
    web::scope("/usage")
        .service(get_usage)
        .service(post_listing)
}
