use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::errors::AppError;
use crate::models::RunScope;
use crate::store::PortfolioRepository;

/// The dates and portfolios one run will work through. Dates ascend; the
/// per-date portfolio filter is applied at execution time against live
/// snapshot state, not here.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub portfolio_ids: Vec<Uuid>,
    pub dates: Vec<NaiveDate>,
}

/// Resolve the scope and choose the date range.
///
/// Backfill uses the watermark rule: the minimum over in-scope portfolios of
/// their latest snapshot date (the most lagging portfolio). Taking the
/// maximum instead would skip lagging and newly onboarded portfolios
/// forever, so every date from the minimum forward is planned and the
/// per-date filter skips portfolios that are already current.
pub async fn plan(
    repo: &dyn PortfolioRepository,
    calendar: &TradingCalendar,
    config: &BatchConfig,
    scope: &RunScope,
    backfill: bool,
    now: DateTime<Utc>,
) -> Result<RunPlan, AppError> {
    let portfolio_ids = match scope {
        RunScope::Universe => {
            let ids = repo.list_active_portfolios().await?;
            if ids.is_empty() {
                return Err(AppError::NoActivePortfolios);
            }
            ids
        }
        RunScope::SinglePortfolio { portfolio_id } => {
            let portfolio = repo
                .fetch_portfolio(*portfolio_id)
                .await?
                .filter(|p| p.is_active())
                .ok_or(AppError::ScopeNotFound(*portfolio_id))?;
            vec![portfolio.id]
        }
    };

    let most_recent = calendar.most_recent_trading_day(now);

    let dates = if backfill {
        let earliest = config
            .backfill_earliest_date
            .unwrap_or_else(|| now.date_naive() - Duration::days(365));
        let mut watermark: Option<NaiveDate> = None;
        for id in &portfolio_ids {
            let w = repo.last_snapshot_date(*id).await?.unwrap_or(earliest);
            watermark = Some(match watermark {
                Some(current) => current.min(w),
                None => w,
            });
        }
        let watermark = watermark.unwrap_or(earliest);

        if watermark >= most_recent {
            // Everything is current (or the watermark is somehow ahead of the
            // calendar); an empty plan completes with zero work.
            debug!(
                "Watermark {} at or past most recent trading day {}, nothing to plan",
                watermark, most_recent
            );
            Vec::new()
        } else {
            calendar.trading_days_between(watermark, most_recent)
        }
    } else {
        vec![most_recent]
    };

    info!(
        "🗓️ Planned {} date(s) across {} portfolio(s), through {}",
        dates.len(),
        portfolio_ids.len(),
        most_recent
    );

    Ok(RunPlan {
        portfolio_ids,
        dates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Portfolio;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::collections::HashSet;

    struct StubRepo {
        portfolios: Vec<Portfolio>,
        watermarks: HashMap<Uuid, NaiveDate>,
    }

    fn portfolio(id: Uuid, active: bool) -> Portfolio {
        Portfolio {
            id,
            owner_id: Uuid::new_v4(),
            display_name: "test".to_string(),
            active,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[async_trait]
    impl PortfolioRepository for StubRepo {
        async fn list_active_portfolios(&self) -> Result<Vec<Uuid>, StoreError> {
            Ok(self
                .portfolios
                .iter()
                .filter(|p| p.is_active())
                .map(|p| p.id)
                .collect())
        }

        async fn fetch_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>, StoreError> {
            Ok(self.portfolios.iter().find(|p| p.id == id).cloned())
        }

        async fn open_positions(
            &self,
            _portfolio_id: Uuid,
            _as_of_date: NaiveDate,
        ) -> Result<Vec<crate::models::Position>, StoreError> {
            Ok(Vec::new())
        }

        async fn distinct_open_symbols(
            &self,
            _portfolio_ids: &[Uuid],
            _as_of_date: NaiveDate,
        ) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        async fn last_snapshot_date(
            &self,
            portfolio_id: Uuid,
        ) -> Result<Option<NaiveDate>, StoreError> {
            Ok(self.watermarks.get(&portfolio_id).copied())
        }

        async fn portfolios_with_snapshot_on(
            &self,
            _date: NaiveDate,
        ) -> Result<HashSet<Uuid>, StoreError> {
            Ok(HashSet::new())
        }

        async fn snapshot(
            &self,
            _portfolio_id: Uuid,
            _as_of_date: NaiveDate,
        ) -> Result<Option<crate::models::PortfolioSnapshotRow>, StoreError> {
            Ok(None)
        }

        async fn upsert_results(
            &self,
            _batch: &crate::models::ResultBatch,
        ) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn factor_exposures(
            &self,
            _portfolio_id: Uuid,
            _as_of_date: NaiveDate,
        ) -> Result<Vec<crate::models::PositionFactorExposureRow>, StoreError> {
            Ok(Vec::new())
        }

        async fn correlation_matrix(
            &self,
            _portfolio_id: Uuid,
            _as_of_date: NaiveDate,
        ) -> Result<Option<crate::models::CorrelationMatrixRow>, StoreError> {
            Ok(None)
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Tuesday 2026-02-03 18:00 UTC; most recent trading day is 2026-02-03
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 18, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn no_active_portfolios_is_an_error() {
        let repo = StubRepo {
            portfolios: vec![portfolio(Uuid::new_v4(), false)],
            watermarks: HashMap::new(),
        };
        let result = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            true,
            now(),
        )
        .await;
        assert!(matches!(result, Err(AppError::NoActivePortfolios)));
    }

    #[tokio::test]
    async fn inactive_single_scope_is_not_found() {
        let id = Uuid::new_v4();
        let repo = StubRepo {
            portfolios: vec![portfolio(id, false)],
            watermarks: HashMap::new(),
        };
        let result = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::SinglePortfolio { portfolio_id: id },
            true,
            now(),
        )
        .await;
        assert!(matches!(result, Err(AppError::ScopeNotFound(_))));
    }

    #[tokio::test]
    async fn system_watermark_is_minimum_across_portfolios() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut watermarks = HashMap::new();
        watermarks.insert(a, date(2026, 2, 2));
        watermarks.insert(b, date(2026, 1, 5));
        let repo = StubRepo {
            portfolios: vec![portfolio(a, true), portfolio(b, true)],
            watermarks,
        };

        let plan = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            true,
            now(),
        )
        .await
        .unwrap();

        // Trading days in (2026-01-05, 2026-02-03]: 20 days (MLK day 1/19 off)
        assert_eq!(plan.dates.first().copied(), Some(date(2026, 1, 6)));
        assert_eq!(plan.dates.last().copied(), Some(date(2026, 2, 3)));
        assert_eq!(plan.dates.len(), 20);
    }

    #[tokio::test]
    async fn caught_up_backfill_plans_nothing() {
        let a = Uuid::new_v4();
        let mut watermarks = HashMap::new();
        watermarks.insert(a, date(2026, 2, 3));
        let repo = StubRepo {
            portfolios: vec![portfolio(a, true)],
            watermarks,
        };

        let plan = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            true,
            now(),
        )
        .await
        .unwrap();
        assert!(plan.dates.is_empty());
    }

    #[tokio::test]
    async fn watermark_ahead_of_calendar_is_guarded() {
        let a = Uuid::new_v4();
        let mut watermarks = HashMap::new();
        // Snapshot in the future relative to the most recent trading day
        watermarks.insert(a, date(2026, 3, 2));
        let repo = StubRepo {
            portfolios: vec![portfolio(a, true)],
            watermarks,
        };

        let plan = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            true,
            now(),
        )
        .await
        .unwrap();
        assert!(plan.dates.is_empty());
    }

    #[tokio::test]
    async fn non_backfill_targets_only_the_most_recent_day() {
        let a = Uuid::new_v4();
        let repo = StubRepo {
            portfolios: vec![portfolio(a, true)],
            watermarks: HashMap::new(),
        };

        let plan = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            false,
            now(),
        )
        .await
        .unwrap();
        assert_eq!(plan.dates, vec![date(2026, 2, 3)]);
    }

    #[tokio::test]
    async fn portfolio_without_history_backfills_a_year() {
        let a = Uuid::new_v4();
        let repo = StubRepo {
            portfolios: vec![portfolio(a, true)],
            watermarks: HashMap::new(),
        };

        let plan = plan(
            &repo,
            &TradingCalendar::new(),
            &BatchConfig::default(),
            &RunScope::Universe,
            true,
            now(),
        )
        .await
        .unwrap();

        // Roughly a year of trading days
        assert!(plan.dates.len() > 240 && plan.dates.len() < 262);
        assert_eq!(plan.dates.last().copied(), Some(date(2026, 2, 3)));
    }
}
