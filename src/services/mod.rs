pub mod failure_cache;
pub mod market_data_service;
pub mod onboarding_service;
pub mod rate_limiter;
pub mod scheduler_service;
