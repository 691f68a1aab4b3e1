use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use foodrec::cache::{MemoryTier, RedisTier, TieredCache, VolatileTier};
use foodrec::db::Database;
use foodrec::geocode::GeocodeApi;
use foodrec::openai::OpenAiClient;
use foodrec::service::RecommendService;
use foodrec::vendors::VendorApi;
use foodrec::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;

    let op_timeout = Duration::from_millis(config.cache_op_timeout_ms);
    let volatile: Arc<dyn VolatileTier> =
        match RedisTier::connect(&config.redis_url, op_timeout).await {
            Ok(tier) => Arc::new(tier),
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, using the in-process cache tier");
                Arc::new(MemoryTier::default())
            }
        };
    let cache = Arc::new(TieredCache::new(volatile, db.clone(), op_timeout));

    let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
    let vendors = VendorApi::new(&config.vendor_base_url, fetch_timeout)?;
    let geocoder = GeocodeApi::new(
        &config.geocode_base_url,
        &config.geocode_api_key,
        fetch_timeout,
    )?;
    let llm = OpenAiClient::new(
        config.llm.base_url.as_str(),
        config.llm.api_key.as_str(),
        Duration::from_secs(config.llm.timeout_secs),
    )?;

    let service = RecommendService::new(config.clone(), cache, db, vendors, geocoder, llm);

    run_server(config, service).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
