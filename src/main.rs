use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use folioscope_backend::app;
use folioscope_backend::calendar::TradingCalendar;
use folioscope_backend::config::BatchConfig;
use folioscope_backend::external::mock::MockProvider;
use folioscope_backend::external::market_data_provider::MarketDataProvider;
use folioscope_backend::external::twelvedata::TwelveDataProvider;
use folioscope_backend::logging::{init_logging, LoggingConfig};
use folioscope_backend::orchestrator::{Orchestrator, RunTracker};
use folioscope_backend::services::market_data_service::MarketDataService;
use folioscope_backend::services::onboarding_service::OnboardingDriver;
use folioscope_backend::services::rate_limiter::RateLimiter;
use folioscope_backend::services::scheduler_service::BatchScheduler;
use folioscope_backend::state::AppState;
use folioscope_backend::store::{
    MarketDataCache, PgMarketDataCache, PgPortfolioRepository, PgRunHistory,
    PortfolioRepository, RunHistoryStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    init_logging(LoggingConfig::from_env())?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    let config = BatchConfig::from_env();

    let provider: Arc<dyn MarketDataProvider> = match TwelveDataProvider::from_env() {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::warn!("📡 No market data provider configured ({}), using mock data", e);
            Arc::new(MockProvider)
        }
    };

    let rate_limiter = Arc::new(RateLimiter::new(
        config.provider_max_concurrency,
        config.provider_requests_per_minute,
    ));
    let cache: Arc<dyn MarketDataCache> = Arc::new(PgMarketDataCache::new(pool.clone()));
    let market_data = Arc::new(MarketDataService::new(
        provider,
        cache,
        rate_limiter,
        &config,
    ));

    let repo: Arc<dyn PortfolioRepository> = Arc::new(PgPortfolioRepository::new(pool.clone()));
    let history: Arc<dyn RunHistoryStore> = Arc::new(PgRunHistory::new(pool.clone()));

    // Built exactly once; every trigger path shares this gate.
    let tracker = Arc::new(RunTracker::new(config.run_timeout));

    let scheduler_cron = config.scheduler_cron.clone();
    let onboarding_max_attempts = config.onboarding_max_attempts;
    let orchestrator = Arc::new(Orchestrator::new(
        repo,
        market_data,
        history.clone(),
        tracker,
        TradingCalendar::new(),
        config,
    ));
    let onboarding = Arc::new(OnboardingDriver::new(
        Arc::clone(&orchestrator),
        onboarding_max_attempts,
    ));

    // Reconcile durable state with the fresh in-memory tracker before
    // anything can trigger a run.
    orchestrator.startup_cleanup().await?;

    let mut scheduler = BatchScheduler::new(Arc::clone(&orchestrator), &scheduler_cron).await?;
    scheduler.start().await?;

    let state = AppState {
        orchestrator,
        onboarding,
        run_history: history,
    };
    let app = app::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Folioscope batch backend running at http://{}/", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
