//! Storefront Checkout - cart pricing and checkout backend

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_checkout::catalog::CouponCatalog;
use storefront_checkout::clock::SystemClock;
use storefront_checkout::config::Config;
use storefront_checkout::services::ApiClient;
use storefront_checkout::store::{CartStore, MemoryCartStore, PgCartStore};
use storefront_checkout::storefront::{forward_events, Collaborators, Storefront};
use storefront_checkout::tasks::PeriodicTask;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn CartStore> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgCartStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, carts are kept in memory");
            Arc::new(MemoryCartStore::new())
        }
    };

    let storefront_api = Arc::new(ApiClient::new(&config.storefront_api_url, config.http_timeout)?.with_token(config.api_token.clone()));
    let address_api = Arc::new(ApiClient::new(&config.address_api_url, config.http_timeout)?.with_token(config.api_token.clone()));

    let storefront = Storefront::new(
        config.pricing_rules(),
        CouponCatalog::new(),
        Collaborators {
            coupons: storefront_api.clone(),
            addresses: address_api,
            orders: storefront_api,
            store,
            clock: Arc::new(SystemClock),
        },
    );

    if let Some(url) = &config.nats_url {
        match async_nats::connect(url.as_str()).await {
            Ok(client) => {
                tokio::spawn(forward_events(storefront.subscribe(), client));
            }
            Err(e) => tracing::warn!(error = %e, "NATS unavailable, checkout events stay local"),
        }
    }

    match storefront.refresh_catalog().await {
        Ok(count) => tracing::info!(count, "coupon catalog loaded"),
        Err(e) => tracing::warn!(error = %e, "initial coupon catalog load failed"),
    }
    let refresher = {
        let storefront = storefront.clone();
        PeriodicTask::start("coupon-catalog-refresh", config.coupon_refresh, move || {
            let storefront = storefront.clone();
            async move {
                if let Err(e) = storefront.refresh_catalog().await {
                    tracing::warn!(error = %e, "coupon catalog refresh failed, keeping previous list");
                }
            }
        })
    };

    let idle_ttl = chrono::Duration::from_std(config.session_idle_ttl)?;
    let sweeper = {
        let storefront = storefront.clone();
        PeriodicTask::start("session-eviction", config.session_sweep, move || {
            let storefront = storefront.clone();
            async move {
                storefront.evict_idle(idle_ttl).await;
            }
        })
    };

    let app = storefront_checkout::api::router(storefront);
    let port = config.port;
    tracing::info!("🚀 Storefront Checkout listening on 0.0.0.0:{}", port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    refresher.shutdown().await;
    sweeper.shutdown().await;
    Ok(())
}
