use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::external::market_data_provider::{MarketDataProvider, ProviderError};
use crate::models::MarketBar;

pub struct TwelveDataProvider {
    client: reqwest::Client,
    api_key: String,
}

impl TwelveDataProvider {
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("TWELVEDATA_API_KEY")
            .map_err(|_| ProviderError::BadResponse("TWELVEDATA_API_KEY not set".into()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    values: Option<Vec<TimeSeriesValue>>,
    status: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

fn parse_decimal(field: &str, value: &str) -> Result<BigDecimal, ProviderError> {
    value
        .parse::<BigDecimal>()
        .map_err(|e| ProviderError::Parse(format!("{}: {}", field, e)))
}

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketBar>, ProviderError> {
        let url = "https://api.twelvedata.com/time_series";

        let resp = self
            .client
            .get(url)
            .query(&[
                ("symbol", symbol),
                ("interval", "1day"),
                ("start_date", &from.to_string()),
                ("end_date", &to.to_string()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }

        let body: TimeSeriesResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.status != "ok" {
            if let Some(msg) = body.message {
                if msg.contains("API rate limit") || msg.contains("credits") {
                    return Err(ProviderError::RateLimited);
                }
                if msg.contains("not found") || msg.contains("**symbol**") {
                    return Err(ProviderError::NotFound);
                }
                return Err(ProviderError::BadResponse(msg));
            }
            return Err(ProviderError::BadResponse(format!(
                "API returned status: {}",
                body.status
            )));
        }

        let values = body
            .values
            .ok_or_else(|| ProviderError::BadResponse("missing values in response".into()))?;

        let mut bars: Vec<MarketBar> = values
            .into_iter()
            .map(|v| -> Result<MarketBar, ProviderError> {
                // "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD"
                let date_part = v.datetime.split(' ').next().unwrap_or(&v.datetime);
                let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                    .map_err(|e| ProviderError::Parse(e.to_string()))?;

                Ok(MarketBar {
                    symbol: symbol.to_string(),
                    date,
                    open: parse_decimal("open", &v.open)?,
                    high: parse_decimal("high", &v.high)?,
                    low: parse_decimal("low", &v.low)?,
                    close: parse_decimal("close", &v.close)?,
                    volume: v
                        .volume
                        .as_deref()
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Twelve Data returns newest first, we need oldest first
        bars.reverse();

        Ok(bars)
    }
}
