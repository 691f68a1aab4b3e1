use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use foodrec::cache::{MemoryTier, RedisTier, TieredCache, VolatileTier};
use foodrec::config::AppConfig;
use foodrec::db::Database;
use foodrec::geocode::GeocodeApi;
use foodrec::models::RecommendParams;
use foodrec::openai::OpenAiClient;
use foodrec::service::RecommendService;
use foodrec::vendors::VendorApi;

#[derive(Parser, Debug)]
#[command(name = "recommend")]
#[command(about = "Run a single vendor recommendation from the terminal")]
struct Cli {
    /// Free-text intent: a food name, a mood, or a situation.
    #[arg(long)]
    text: Option<String>,
    #[arg(long)]
    lat: f64,
    #[arg(long)]
    lng: f64,
    /// Mood tag, repeatable.
    #[arg(long = "type", value_name = "TAG")]
    types: Vec<String>,
    /// Bypass cached results by injecting a fresh nonce.
    #[arg(long, default_value_t = false)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

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
    let service = RecommendService::new(config, cache, db, vendors, geocoder, llm);

    let dummy = cli.fresh.then(|| format!("cli-{}", uuid::Uuid::new_v4()));
    let params = RecommendParams {
        text: cli.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        lat: cli.lat,
        lng: cli.lng,
        mood_types: cli.types,
        dummy,
        test_mode: false,
    };

    let response = service.recommend(params).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
