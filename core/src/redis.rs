pub fn setup_redis(url: &str) -> Result<deadpool_redis::Pool, deadpool_redis::CreatePoolError> {
    let cfg = deadpool_redis::Config::from_url(url);
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
}
