use crate::engines::{aligned_returns, regression_beta, EngineError, EngineInput, DEFAULT_BENCHMARK};
use crate::models::PositionMarketBetaRow;

/// Return observations used for the regression.
const LOOKBACK_RETURNS: usize = 60;
const MIN_OBSERVATIONS: usize = 30;

/// OLS beta of each listed position against the market benchmark.
pub fn compute(input: &EngineInput) -> Result<Vec<PositionMarketBetaRow>, EngineError> {
    if input.listed_positions().next().is_none() {
        return Ok(Vec::new());
    }

    if input.view.observations(DEFAULT_BENCHMARK) < MIN_OBSERVATIONS {
        return Err(EngineError::InsufficientData(format!(
            "benchmark {} has {} observations, need {}",
            DEFAULT_BENCHMARK,
            input.view.observations(DEFAULT_BENCHMARK),
            MIN_OBSERVATIONS
        )));
    }

    let mut rows = Vec::new();
    let mut starved = 0usize;
    let mut degenerate = 0usize;
    let mut listed = 0usize;

    for position in input.listed_positions() {
        listed += 1;
        let pairs = aligned_returns(&input.view, &position.symbol, DEFAULT_BENCHMARK);
        if pairs.len() < MIN_OBSERVATIONS {
            starved += 1;
            continue;
        }

        let window_start = pairs.len().saturating_sub(LOOKBACK_RETURNS);
        let window = &pairs[window_start..];
        let ys: Vec<f64> = window.iter().map(|(r, _)| *r).collect();
        let xs: Vec<f64> = window.iter().map(|(_, b)| *b).collect();

        match regression_beta(&ys, &xs) {
            Some((beta, r_squared)) => rows.push(PositionMarketBetaRow {
                position_id: position.id,
                as_of_date: input.as_of_date,
                benchmark: DEFAULT_BENCHMARK.to_string(),
                beta,
                r_squared,
                observations: window.len() as i32,
            }),
            None => degenerate += 1,
        }
    }

    if listed > 0 && rows.is_empty() {
        if starved > 0 {
            return Err(EngineError::InsufficientData(format!(
                "{} of {} positions below {} aligned observations",
                starved, listed, MIN_OBSERVATIONS
            )));
        }
        if degenerate > 0 {
            return Err(EngineError::DegenerateInput(
                "benchmark returns are constant".to_string(),
            ));
        }
    }

    rows.sort_by_key(|r| r.position_id);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use uuid::Uuid;

    #[test]
    fn benchmark_beta_against_itself_is_one() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("SPY", &bars("SPY", as_of, &trending_closes(400.0, 80)));
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "SPY", "5")],
            view,
            risk_free_rate: 0.045,
        };

        let rows = compute(&input).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].beta - 1.0).abs() < 1e-9);
        assert!((rows[0].r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_benchmark_is_insufficient() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 80)));
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "AAPL", "10")],
            view,
            risk_free_rate: 0.045,
        };

        assert!(matches!(
            compute(&input),
            Err(EngineError::InsufficientData(_))
        ));
    }
}
