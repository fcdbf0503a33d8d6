use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgSslMode},
};
use std::{str::FromStr, sync::Arc};

pub mod boost;
pub mod listing;
pub mod memory;
pub mod plan;
pub mod subscription;
pub mod usage;

pub mod models {
    pub mod boost;
    pub mod listing;
    pub mod plan;
    pub mod subscription;
    pub mod usage;
}

pub mod dtos {
    pub mod boost;
    pub mod listing;
    pub mod plan;
    pub mod subscription;
}

use boost::{BoostStore, PgBoostStore};
use listing::{ListingStore, PgListingStore};
use memory::MemoryStore;
use plan::{PgPlanStore, PlanStore};
use subscription::{PgSubscriptionStore, SubscriptionStore};
use usage::{PgUsageStore, UsageStore};

pub async fn setup(
    database_url: &str,
    require_ssl: bool,
) -> Result<Arc<PgPool>, Box<dyn std::error::Error>> {
    let url = url::Url::parse(database_url)?;
    let db_name = url.path().trim_start_matches('/');
    let username = url.username();
    let password = url.password().unwrap_or("");
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(5432);

    let admin_url = format!(
        "postgresql://{}:{}@{}:{}/postgres",
        username, password, host, port
    );

    let mut admin_options = PgConnectOptions::from_str(&admin_url)?;
    if require_ssl {
        admin_options = admin_options.ssl_mode(PgSslMode::Require);
    }

    let admin_pool = PgPool::connect_with(admin_options).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&admin_pool)
            .await?;

    if !exists {
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&admin_pool)
            .await?;
    }

    admin_pool.close().await;

    let mut options = PgConnectOptions::from_str(database_url)?;
    if require_ssl {
        options = options.ssl_mode(PgSslMode::Require);
    }
    let pool = PgPool::connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(Arc::new(pool))
}

/// Every persistence collaborator the engine needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub plans: Arc<dyn PlanStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub usage: Arc<dyn UsageStore>,
    pub boosts: Arc<dyn BoostStore>,
    pub listings: Arc<dyn ListingStore>,
}

impl Stores {
    pub fn postgres(pool: Arc<PgPool>) -> Self {
        Stores {
            plans: Arc::new(PgPlanStore::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionStore::new(pool.clone())),
            usage: Arc::new(PgUsageStore::new(pool.clone())),
            boosts: Arc::new(PgBoostStore::new(pool.clone())),
            listings: Arc::new(PgListingStore::new(pool)),
        }
    }

    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    /// Wires every store to the same in-memory backend. Tests keep the `Arc`
    /// to inspect state directly.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Stores {
            plans: store.clone(),
            subscriptions: store.clone(),
            usage: store.clone(),
            boosts: store.clone(),
            listings: store,
        }
    }
}
