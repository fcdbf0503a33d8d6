use actix_web::{Responder, post, web};
use common::{error::Res, http::Success};
use scheduler::Scheduler;

/// Runs a sweep out of schedule (`subscriptions`, `boosts`, `plans` or
/// `usage`). 409 while the same sweep is running.
#[post("/{name}/run")]
pub async fn post_run(
    scheduler: web::Data<Scheduler>,
    path: web::Path<String>,
) -> Res<impl Responder> {
    let report = scheduler.run_now(&path.into_inner()).await?;
    Success::ok(report)
}

pub fn mount() -> actix_web::Scope {
    web::scope("/sweeps").service(post_run)
}
