use actix_web::{Responder, delete, get, patch, post, web};
use chrono::{DateTime, Utc};
use common::{error::Res, http::Success};
use db::dtos::plan::{PlanCreateRequest, PlanUpdateRequest};
use serde::Deserialize;
use uuid::Uuid;

use crate::services::Services;

#[derive(Debug, Default, Deserialize)]
pub struct PlanListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlanScheduleRequest {
    pub activate_at: Option<DateTime<Utc>>,
    pub deactivate_at: Option<DateTime<Utc>>,
}

/// Lists purchasable plans; `?include_inactive=true` adds retired ones.
#[get("")]
pub async fn get_plans(
    services: web::Data<Services>,
    query: web::Query<PlanListQuery>,
) -> Res<impl Responder> {
    let plans = services.catalog.list_all(query.include_inactive).await?;
    Success::ok(plans)
}

#[post("")]
pub async fn post_plan(
    services: web::Data<Services>,
    req: web::Json<PlanCreateRequest>,
) -> Res<impl Responder> {
    let plan = services.catalog.create(req.into_inner()).await?;
    Success::created(plan)
}

#[get("/{plan_id}")]
pub async fn get_plan(services: web::Data<Services>, path: web::Path<Uuid>) -> Res<impl Responder> {
    Success::ok(services.catalog.get(path.into_inner()).await?)
}

#[patch("/{plan_id}")]
pub async fn patch_plan(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    req: web::Json<PlanUpdateRequest>,
) -> Res<impl Responder> {
    let plan = services
        .catalog
        .update(path.into_inner(), req.into_inner())
        .await?;
    Success::ok(plan)
}

/// Refused with 409 while the plan has active subscribers.
#[delete("/{plan_id}")]
pub async fn delete_plan(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    services.catalog.delete(path.into_inner()).await?;
    Success::no_content()
}

#[post("/{plan_id}/schedule")]
pub async fn post_schedule(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
    req: web::Json<PlanScheduleRequest>,
) -> Res<impl Responder> {
    let id = path.into_inner();
    let mut plan = services.catalog.get(id).await?;
    if let Some(at) = req.activate_at {
        plan = services.catalog.schedule_activation(id, at).await?;
    }
    if let Some(at) = req.deactivate_at {
        plan = services.catalog.schedule_deactivation(id, at).await?;
    }
    Success::ok(plan)
}

#[get("/{plan_id}/stats")]
pub async fn get_stats(
    services: web::Data<Services>,
    path: web::Path<Uuid>,
) -> Res<impl Responder> {
    Success::ok(services.catalog.stats(path.into_inner()).await?)
}

pub fn mount() -> actix_web::Scope {
    web::scope("/plans")
        .service(get_plans)
        .service(post_plan)
        .service(get_plan)
        .service(patch_plan)
        .service(delete_plan)
        .service(post_schedule)
        .service(get_stats)
}
