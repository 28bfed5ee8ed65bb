use crate::engines::{EngineError, EngineInput};
use crate::models::PositionVolatilityRow;

/// Trading days of history considered.
const LOOKBACK_DAYS: usize = 63;
/// Minimum usable closes before we emit a number.
const MIN_OBSERVATIONS: usize = 20;

/// Annualized realized volatility and max drawdown per listed position.
pub fn compute(input: &EngineInput) -> Result<Vec<PositionVolatilityRow>, EngineError> {
    let mut rows = Vec::new();
    let mut starved = 0usize;
    let mut degenerate = 0usize;
    let mut listed = 0usize;

    for position in input.listed_positions() {
        listed += 1;
        let closes = input.view.closes(&position.symbol);
        if closes.len() < MIN_OBSERVATIONS {
            starved += 1;
            continue;
        }

        let window_start = closes.len().saturating_sub(LOOKBACK_DAYS);
        let window: Vec<f64> = closes[window_start..].iter().map(|(_, c)| *c).collect();

        match vol_and_drawdown(&window) {
            Some((vol, drawdown)) => rows.push(PositionVolatilityRow {
                position_id: position.id,
                as_of_date: input.as_of_date,
                realized_vol: vol,
                max_drawdown: drawdown,
                lookback_days: window.len() as i32,
            }),
            None => degenerate += 1,
        }
    }

    if listed > 0 && rows.is_empty() {
        if starved > 0 {
            return Err(EngineError::InsufficientData(format!(
                "{} of {} positions below {} observations",
                starved, listed, MIN_OBSERVATIONS
            )));
        }
        if degenerate > 0 {
            return Err(EngineError::DegenerateInput(
                "all position series are constant".to_string(),
            ));
        }
    }

    rows.sort_by_key(|r| r.position_id);
    Ok(rows)
}

/// Annualized volatility (percent) and max drawdown (percent, negative).
/// `None` when the series has no usable variation.
fn vol_and_drawdown(closes: &[f64]) -> Option<(f64, f64)> {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let variance = crate::engines::variance(&returns);
    if variance.abs() < f64::EPSILON {
        return None;
    }
    let volatility = variance.sqrt() * (252.0_f64).sqrt() * 100.0;

    let mut peak = closes[0];
    let mut max_dd = 0.0;
    for &price in closes {
        if price > peak {
            peak = price;
        }
        let dd = (price - peak) / peak;
        if dd < max_dd {
            max_dd = dd;
        }
    }

    Some((volatility, max_dd * 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use uuid::Uuid;

    fn input_with(symbol: &str, closes: &[f64]) -> EngineInput {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars(symbol, &bars(symbol, as_of, closes));
        EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, symbol, "10")],
            view,
            risk_free_rate: 0.045,
        }
    }

    #[test]
    fn emits_one_row_per_position() {
        let input = input_with("AAPL", &trending_closes(100.0, 80));
        let rows = compute(&input).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].realized_vol > 0.0);
        assert!(rows[0].max_drawdown <= 0.0);
        assert_eq!(rows[0].lookback_days, 63);
    }

    #[test]
    fn short_series_is_insufficient() {
        let input = input_with("AAPL", &trending_closes(100.0, 5));
        assert!(matches!(
            compute(&input),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn constant_series_is_degenerate() {
        let input = input_with("AAPL", &vec![100.0; 40]);
        assert!(matches!(
            compute(&input),
            Err(EngineError::DegenerateInput(_))
        ));
    }

    #[test]
    fn no_listed_positions_is_empty_ok() {
        let mut input = input_with("AAPL", &trending_closes(100.0, 80));
        input.positions.clear();
        assert!(compute(&input).unwrap().is_empty());
    }

    #[test]
    fn drawdown_matches_known_series() {
        // 100 -> 120 -> 90: drawdown is (90-120)/120 = -25%
        let (_, dd) = vol_and_drawdown(&[100.0, 120.0, 90.0, 95.0]).unwrap();
        assert!((dd + 25.0).abs() < 1e-9);
    }
}
