use std::collections::BTreeSet;

use crate::engines::{aligned_returns, correlation, EngineError, EngineInput};
use crate::models::CorrelationMatrixRow;

const MIN_OBSERVATIONS: usize = 30;

/// Pairwise return correlations across the portfolio's listed symbols,
/// stored as one JSONB matrix row per (portfolio, date).
///
/// Fewer than two symbols with coverage is an empty (skipped) result, not an
/// error: single-name portfolios have no correlation structure to report.
pub fn compute(input: &EngineInput) -> Result<Vec<CorrelationMatrixRow>, EngineError> {
    let symbols: BTreeSet<String> = input
        .listed_positions()
        .map(|p| p.symbol.clone())
        .collect();

    let covered: Vec<String> = symbols
        .into_iter()
        .filter(|s| input.view.observations(s) >= MIN_OBSERVATIONS)
        .collect();

    if covered.len() < 2 {
        return Ok(Vec::new());
    }

    let n = covered.len();
    let mut matrix = vec![vec![1.0f64; n]; n];
    let mut min_observations = usize::MAX;

    for i in 0..n {
        for j in (i + 1)..n {
            let pairs = aligned_returns(&input.view, &covered[i], &covered[j]);
            if pairs.len() < MIN_OBSERVATIONS {
                return Err(EngineError::InsufficientData(format!(
                    "{} aligned observations between {} and {}, need {}",
                    pairs.len(),
                    covered[i],
                    covered[j],
                    MIN_OBSERVATIONS
                )));
            }
            min_observations = min_observations.min(pairs.len());

            let xs: Vec<f64> = pairs.iter().map(|(a, _)| *a).collect();
            let ys: Vec<f64> = pairs.iter().map(|(_, b)| *b).collect();
            let rho = correlation(&xs, &ys).ok_or_else(|| {
                EngineError::DegenerateInput(format!(
                    "constant return series for {} or {}",
                    covered[i], covered[j]
                ))
            })?;
            matrix[i][j] = rho;
            matrix[j][i] = rho;
        }
    }

    let row = CorrelationMatrixRow {
        portfolio_id: input.portfolio_id,
        as_of_date: input.as_of_date,
        symbols: serde_json::to_value(&covered)
            .map_err(|e| EngineError::Computation(e.to_string()))?,
        matrix: serde_json::to_value(&matrix)
            .map_err(|e| EngineError::Computation(e.to_string()))?,
        observations: min_observations as i32,
    };

    Ok(vec![row])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use uuid::Uuid;

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 80)));
        view.insert_bars("MSFT", &bars("MSFT", as_of, &trending_closes(300.0, 80)));
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![
                position(portfolio_id, "AAPL", "10"),
                position(portfolio_id, "MSFT", "5"),
            ],
            view,
            risk_free_rate: 0.045,
        };

        let rows = compute(&input).unwrap();
        assert_eq!(rows.len(), 1);
        let matrix = rows[0].matrix_values();
        assert_eq!(matrix.len(), 2);
        assert!((matrix[0][0] - 1.0).abs() < 1e-12);
        assert!((matrix[0][1] - matrix[1][0]).abs() < 1e-12);
        assert!(matrix[0][1].abs() <= 1.0 + 1e-12);
        assert_eq!(rows[0].symbol_list(), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn single_symbol_portfolio_is_empty_ok() {
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

        assert!(compute(&input).unwrap().is_empty());
    }

    #[test]
    fn duplicate_symbols_collapse() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 80)));
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![
                position(portfolio_id, "AAPL", "10"),
                position(portfolio_id, "AAPL", "3"),
            ],
            view,
            risk_free_rate: 0.045,
        };

        // Two positions, one symbol: still nothing to correlate
        assert!(compute(&input).unwrap().is_empty());
    }
}
