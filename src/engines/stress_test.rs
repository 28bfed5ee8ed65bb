use std::collections::HashMap;

use bigdecimal::ToPrimitive;
use uuid::Uuid;

use crate::engines::{snapshot, EngineError, EngineInput};
use crate::models::{
    CorrelationMatrixRow, PortfolioSnapshotRow, PositionFactorExposureRow, StressTestRow,
};

/// Factor shock scenarios: (name, factor proxy, shock in percent).
const SCENARIOS: [(&str, &str, f64); 8] = [
    ("market_crash_20", "SPY", -20.0),
    ("market_selloff_10", "SPY", -10.0),
    ("market_rally_10", "SPY", 10.0),
    ("tech_selloff_15", "QQQ", -15.0),
    ("small_cap_selloff_15", "IWM", -15.0),
    ("rates_up_100bp", "TLT", -8.0),
    ("credit_stress_10", "HYG", -10.0),
    ("gold_rally_10", "GLD", 10.0),
];

/// Scenario applied across every factor, scaled by average correlation.
const CONTAGION_SCENARIO: (&str, f64) = ("correlated_selloff_15", -15.0);

/// First-order scenario P&L from committed factor exposures:
/// `pnl = Σ_position value(p) × exposure(p, factor) × shock`.
pub fn compute(
    input: &EngineInput,
    exposures: &[PositionFactorExposureRow],
    correlation: Option<&CorrelationMatrixRow>,
    snapshot_row: &PortfolioSnapshotRow,
) -> Result<Vec<StressTestRow>, EngineError> {
    let total_value = snapshot_row.total_value.to_f64().unwrap_or(0.0);
    let gross = snapshot_row.gross_exposure.to_f64().unwrap_or(0.0);

    if gross.abs() < f64::EPSILON {
        return Err(EngineError::DegenerateInput(
            "portfolio has no market exposure".to_string(),
        ));
    }
    if exposures.is_empty() {
        return Err(EngineError::InsufficientData(
            "no committed factor exposures for this date".to_string(),
        ));
    }

    // (position, factor) -> exposure, and per-position mark-to-market values
    let exposure_by_key: HashMap<(Uuid, &str), f64> = exposures
        .iter()
        .map(|e| ((e.position_id, e.factor.as_str()), e.exposure))
        .collect();

    let mut values: HashMap<Uuid, f64> = HashMap::new();
    for position in &input.positions {
        values.insert(position.id, snapshot::position_value(input, position)?);
    }

    let mut rows = Vec::new();
    for (name, factor, shock_pct) in SCENARIOS {
        let pnl: f64 = input
            .positions
            .iter()
            .map(|p| {
                let value = values.get(&p.id).copied().unwrap_or(0.0);
                let exposure = exposure_by_key
                    .get(&(p.id, factor))
                    .copied()
                    .unwrap_or(0.0);
                value * exposure * shock_pct / 100.0
            })
            .sum();

        rows.push(make_row(input, name, total_value, pnl));
    }

    // Contagion case: every position moves with the market shock, damped by
    // how correlated the book actually is.
    let avg_corr = correlation.and_then(average_off_diagonal).unwrap_or(1.0);
    let (name, shock_pct) = CONTAGION_SCENARIO;
    let pnl: f64 = input
        .positions
        .iter()
        .map(|p| {
            let value = values.get(&p.id).copied().unwrap_or(0.0);
            let market_beta = exposure_by_key.get(&(p.id, "SPY")).copied().unwrap_or(0.0);
            value * market_beta * avg_corr * shock_pct / 100.0
        })
        .sum();
    rows.push(make_row(input, name, total_value, pnl));

    rows.sort_by(|a, b| a.scenario.cmp(&b.scenario));
    Ok(rows)
}

fn make_row(input: &EngineInput, scenario: &str, total_value: f64, pnl: f64) -> StressTestRow {
    StressTestRow {
        portfolio_id: input.portfolio_id,
        as_of_date: input.as_of_date,
        scenario: scenario.to_string(),
        shocked_value: total_value + pnl,
        pnl,
        pnl_pct: if total_value.abs() > f64::EPSILON {
            pnl / total_value * 100.0
        } else {
            0.0
        },
    }
}

fn average_off_diagonal(matrix: &CorrelationMatrixRow) -> Option<f64> {
    let values = matrix.matrix_values();
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += values[i][j];
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some((sum / count as f64).clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn snapshot_row(portfolio_id: Uuid, total: &str, gross: &str) -> PortfolioSnapshotRow {
        PortfolioSnapshotRow {
            portfolio_id,
            as_of_date: date(2026, 2, 2),
            total_value: BigDecimal::from_str(total).unwrap(),
            long_value: BigDecimal::from_str(gross).unwrap(),
            short_value: BigDecimal::from_str("0").unwrap(),
            gross_exposure: BigDecimal::from_str(gross).unwrap(),
            net_exposure: BigDecimal::from_str(total).unwrap(),
            position_count: 1,
        }
    }

    #[test]
    fn market_crash_loses_beta_times_shock() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &[100.0, 100.0]));

        let pos = position(portfolio_id, "AAPL", "10"); // value 1000
        let exposures = vec![PositionFactorExposureRow {
            position_id: pos.id,
            as_of_date: as_of,
            factor: "SPY".to_string(),
            exposure: 1.2,
            r_squared: 0.8,
        }];

        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![pos],
            view,
            risk_free_rate: 0.045,
        };

        let rows = compute(
            &input,
            &exposures,
            None,
            &snapshot_row(portfolio_id, "1000", "1000"),
        )
        .unwrap();

        let crash = rows.iter().find(|r| r.scenario == "market_crash_20").unwrap();
        // 1000 * 1.2 * -20% = -240
        assert!((crash.pnl + 240.0).abs() < 1e-9);
        assert!((crash.shocked_value - 760.0).abs() < 1e-9);
        assert!((crash.pnl_pct + 24.0).abs() < 1e-9);
    }

    #[test]
    fn no_exposures_is_insufficient() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &[100.0, 100.0]));
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "AAPL", "10")],
            view,
            risk_free_rate: 0.045,
        };

        assert!(matches!(
            compute(&input, &[], None, &snapshot_row(portfolio_id, "1000", "1000")),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn empty_book_is_degenerate() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![],
            view: MarketView::new(as_of),
            risk_free_rate: 0.045,
        };

        assert!(matches!(
            compute(&input, &[], None, &snapshot_row(portfolio_id, "0", "0")),
            Err(EngineError::DegenerateInput(_))
        ));
    }
}
