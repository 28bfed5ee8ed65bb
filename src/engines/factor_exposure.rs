use crate::engines::{
    aligned_returns, regression_beta, EngineError, EngineInput, FACTOR_PROXY_ETFS,
};
use crate::models::PositionFactorExposureRow;

const LOOKBACK_RETURNS: usize = 60;
const MIN_OBSERVATIONS: usize = 30;

/// Univariate regression exposure of each listed position against each
/// factor-proxy ETF. Factors without cache coverage are omitted rather than
/// failing the whole engine; the next run picks them up.
pub fn compute(input: &EngineInput) -> Result<Vec<PositionFactorExposureRow>, EngineError> {
    if input.listed_positions().next().is_none() {
        return Ok(Vec::new());
    }

    let covered_factors: Vec<&str> = FACTOR_PROXY_ETFS
        .iter()
        .copied()
        .filter(|f| input.view.observations(f) >= MIN_OBSERVATIONS)
        .collect();

    if covered_factors.is_empty() {
        return Err(EngineError::InsufficientData(
            "no factor proxy has enough observations".to_string(),
        ));
    }

    let mut rows = Vec::new();
    let mut listed = 0usize;
    let mut starved = 0usize;

    for position in input.listed_positions() {
        listed += 1;
        let mut emitted = false;
        for factor in &covered_factors {
            // A factor ETF held as a position regresses against itself; that
            // exposure of 1.0 is correct, not a special case.
            let pairs = aligned_returns(&input.view, &position.symbol, factor);
            if pairs.len() < MIN_OBSERVATIONS {
                continue;
            }
            let window_start = pairs.len().saturating_sub(LOOKBACK_RETURNS);
            let window = &pairs[window_start..];
            let ys: Vec<f64> = window.iter().map(|(r, _)| *r).collect();
            let xs: Vec<f64> = window.iter().map(|(_, f)| *f).collect();

            if let Some((exposure, r_squared)) = regression_beta(&ys, &xs) {
                rows.push(PositionFactorExposureRow {
                    position_id: position.id,
                    as_of_date: input.as_of_date,
                    factor: factor.to_string(),
                    exposure,
                    r_squared,
                });
                emitted = true;
            }
        }
        if !emitted {
            starved += 1;
        }
    }

    if listed > 0 && rows.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "{} of {} positions have no aligned factor history",
            starved, listed
        )));
    }

    rows.sort_by(|a, b| (a.position_id, &a.factor).cmp(&(b.position_id, &b.factor)));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use uuid::Uuid;

    #[test]
    fn emits_rows_for_covered_factors_only() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 80)));
        view.insert_bars("SPY", &bars("SPY", as_of, &trending_closes(400.0, 80)));
        view.insert_bars("QQQ", &bars("QQQ", as_of, &trending_closes(350.0, 80)));
        // The other 15 factors have no data at all
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "AAPL", "10")],
            view,
            risk_free_rate: 0.045,
        };

        let rows = compute(&input).unwrap();
        let factors: Vec<&str> = rows.iter().map(|r| r.factor.as_str()).collect();
        assert_eq!(factors, vec!["QQQ", "SPY"]);
    }

    #[test]
    fn no_factor_coverage_is_insufficient() {
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
