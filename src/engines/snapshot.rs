use bigdecimal::{BigDecimal, ToPrimitive};
use std::str::FromStr;

use crate::engines::{EngineError, EngineInput};
use crate::models::{AssetKind, PortfolioSnapshotRow};

/// Portfolio valuation snapshot. This is the landmark row: committing it
/// advances the portfolio's watermark, so it is only produced when every
/// open listed position can actually be priced.
pub fn compute(input: &EngineInput) -> Result<PortfolioSnapshotRow, EngineError> {
    let mut long_value = 0.0f64;
    let mut short_value = 0.0f64;

    for position in &input.positions {
        let value = position_value(input, position)?;
        if value >= 0.0 {
            long_value += value;
        } else {
            short_value += value.abs();
        }
    }

    let total = long_value - short_value;
    let gross = long_value + short_value;

    Ok(PortfolioSnapshotRow {
        portfolio_id: input.portfolio_id,
        as_of_date: input.as_of_date,
        total_value: to_decimal(total)?,
        long_value: to_decimal(long_value)?,
        short_value: to_decimal(short_value)?,
        gross_exposure: to_decimal(gross)?,
        net_exposure: to_decimal(total)?,
        position_count: input.positions.len() as i32,
    })
}

/// Mark-to-market value of one position against the view. Shared with the
/// aggregation engines so every phase-3 engine prices positions identically.
pub(crate) fn position_value(
    input: &EngineInput,
    position: &crate::models::Position,
) -> Result<f64, EngineError> {
    let quantity = position.signed_quantity();

    match position.asset_kind {
        AssetKind::Private => {
            // No market feed; carried at entry price.
            let entry = position.entry_price.to_f64().unwrap_or(0.0);
            Ok(quantity * entry)
        }
        AssetKind::OptionCall | AssetKind::OptionPut => {
            let spot = input.view.latest_close(&position.symbol).ok_or_else(|| {
                EngineError::InsufficientData(format!(
                    "no close for option underlying {}",
                    position.symbol
                ))
            })?;
            let strike = position
                .option_strike
                .as_ref()
                .and_then(|s| s.to_f64())
                .unwrap_or(0.0);
            let intrinsic = if position.asset_kind == AssetKind::OptionCall {
                (spot - strike).max(0.0)
            } else {
                (strike - spot).max(0.0)
            };
            Ok(quantity * intrinsic)
        }
        AssetKind::EquityLong | AssetKind::EquityShort => {
            let close = input.view.latest_close(&position.symbol).ok_or_else(|| {
                EngineError::InsufficientData(format!("no close for {}", position.symbol))
            })?;
            Ok(quantity * close)
        }
    }
}

fn to_decimal(value: f64) -> Result<BigDecimal, EngineError> {
    BigDecimal::from_str(&format!("{:.4}", value))
        .map_err(|e| EngineError::Computation(format!("decimal conversion: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use crate::models::AssetKind;
    use uuid::Uuid;

    #[test]
    fn empty_portfolio_writes_zero_snapshot() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![],
            view: MarketView::new(as_of),
            risk_free_rate: 0.045,
        };

        let row = compute(&input).unwrap();
        assert_eq!(row.position_count, 0);
        assert_eq!(row.total_value.to_f64().unwrap(), 0.0);
    }

    #[test]
    fn long_and_short_split() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &[150.0, 152.0]));
        view.insert_bars("TSLA", &bars("TSLA", as_of, &[200.0, 210.0]));

        let mut short = position(portfolio_id, "TSLA", "5");
        short.asset_kind = AssetKind::EquityShort;

        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "AAPL", "10"), short],
            view,
            risk_free_rate: 0.045,
        };

        let row = compute(&input).unwrap();
        assert_eq!(row.long_value.to_f64().unwrap(), 1520.0);
        assert_eq!(row.short_value.to_f64().unwrap(), 1050.0);
        assert_eq!(row.total_value.to_f64().unwrap(), 470.0);
        assert_eq!(row.gross_exposure.to_f64().unwrap(), 2570.0);
    }

    #[test]
    fn unpriced_listed_position_is_insufficient() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![position(portfolio_id, "AAPL", "10")],
            view: MarketView::new(as_of),
            risk_free_rate: 0.045,
        };

        assert!(matches!(
            compute(&input),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn private_position_carried_at_entry() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut pos = position(portfolio_id, "ACME-PRIVATE", "100");
        pos.asset_kind = AssetKind::Private;

        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![pos],
            view: MarketView::new(as_of),
            risk_free_rate: 0.045,
        };

        let row = compute(&input).unwrap();
        assert_eq!(row.total_value.to_f64().unwrap(), 10_000.0);
    }
}
