mod redis;
mod routes;
mod services;

use std::{sync::Arc, time::Duration};

use actix_web::{App, HttpServer, middleware, web};
use common::{
    clock::{Clock, SystemClock},
    env_config::Config,
    notify::{LogNotifier, Notifier},
};
use db::Stores;
use scheduler::lock::{LocalRunLock, RedisRunLock, RunLock};
use subs::services::pay::{AcceptAllPayments, PaymentGateway, StripePayments};

use crate::services::Services;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // get env vars
    let config = Config::from_env();

    // init logger
    logger::setup(&config.log_file, config.console_logging_enabled)
        .expect("Failed to set up logger");

    // init storage
    let stores = match &config.database_url {
        Some(url) => {
            let pool = db::setup(url, config.is_production())
                .await
                .expect("Failed to set up database");
            Stores::postgres(pool)
        }
        None => {
            log::warn!("DATABASE_URL is not set, state is kept in memory only");
            Stores::memory()
        }
    };

    // sweeps coordinate through Redis when several instances run
    let run_lock: Arc<dyn RunLock> = match &config.redis_url {
        Some(url) => {
            let pool = redis::setup_redis(url).expect("Failed to create pool of Redis connections");
            Arc::new(RedisRunLock::new(pool))
        }
        None => Arc::new(LocalRunLock::new()),
    };

    let payments: Arc<dyn PaymentGateway> = if config.stripe_secret_key.is_empty() {
        log::warn!("STRIPE_SECRET_KEY is not set, every charge is accepted");
        Arc::new(AcceptAllPayments)
    } else {
        Arc::new(StripePayments::new(common::stripe::create_client(
            &config.stripe_secret_key,
        )))
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let services = Services::new(&stores, payments, notifier, clock.clone());

    let scheduler = Arc::new(
        services
            .scheduler(&stores, clock, run_lock, &config.scheduler)
            .expect("Failed to build scheduler"),
    );
    let sweeper = scheduler
        .clone()
        .start(Duration::from_secs(config.scheduler.tick_secs));

    log::info!(
        "Listening on {}:{}",
        config.server_host,
        config.server_port
    );
    let served = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(services.clone()))
            .app_data(web::Data::from(scheduler.clone()))
            .app_data(routes::json_config())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .workers(config.num_workers)
    .run()
    .await;

    sweeper.abort();
    served
}
