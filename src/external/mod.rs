pub mod market_data_provider;
pub mod mock;
pub mod twelvedata;
