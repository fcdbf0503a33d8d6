use actix_web::{Responder, get, web};
use common::{
    error::{AppError, Res},
    http::Success,
};
use serde::Serialize;

pub mod boost;
pub mod plan;
pub mod sub;
pub mod sweep;

/// Malformed JSON bodies become validation errors.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::Validation(err.to_string()).into())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[get("/health")]
async fn health() -> Res<impl Responder> {
    Success::ok(Health { status: "ok" })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/api")
            .service(plan::mount())
            .service(sub::mount_subscriptions())
            .service(sub::mount_usage())
            .service(boost::mount())
            .service(sweep::mount()),
    );
}
