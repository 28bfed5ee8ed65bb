use bigdecimal::ToPrimitive;

use crate::engines::{EngineError, EngineInput};
use crate::models::{AssetKind, PositionGreeksRow};

/// Minimum closes on the underlying before we trust a realized-vol proxy.
const MIN_OBSERVATIONS: usize = 20;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Black-Scholes greeks for option positions, one unit of the contract.
///
/// The volatility input is the underlying's realized vol over the cached
/// window, used as an implied-vol proxy; quoted option prices are not part
/// of the market data feed.
pub fn compute(input: &EngineInput) -> Result<Vec<PositionGreeksRow>, EngineError> {
    let options: Vec<_> = input
        .positions
        .iter()
        .filter(|p| p.asset_kind.is_option())
        .collect();

    // Equity-only portfolios legitimately produce nothing here.
    if options.is_empty() {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    let mut starved = 0usize;

    for position in &options {
        let closes = input.view.closes(&position.symbol);
        if closes.len() < MIN_OBSERVATIONS {
            starved += 1;
            continue;
        }

        let spot = closes.last().map(|(_, c)| *c).unwrap_or(0.0);
        let strike = position
            .option_strike
            .as_ref()
            .and_then(|s| s.to_f64())
            .unwrap_or(0.0);
        let expiry = match position.option_expiry {
            Some(e) => e,
            None => {
                return Err(EngineError::Computation(format!(
                    "option position {} has no expiry",
                    position.id
                )))
            }
        };

        if spot <= 0.0 || strike <= 0.0 {
            return Err(EngineError::Computation(format!(
                "non-positive spot or strike for position {}",
                position.id
            )));
        }

        let years_to_expiry =
            (expiry - input.as_of_date).num_days().max(1) as f64 / 365.0;

        let sigma = realized_vol(closes.iter().map(|(_, c)| *c));
        let sigma = match sigma {
            Some(s) if s > 0.0 => s,
            _ => {
                starved += 1;
                continue;
            }
        };

        let is_call = position.asset_kind == AssetKind::OptionCall;
        let greeks = black_scholes_greeks(
            spot,
            strike,
            years_to_expiry,
            input.risk_free_rate,
            sigma,
            is_call,
        );

        rows.push(PositionGreeksRow {
            position_id: position.id,
            as_of_date: input.as_of_date,
            delta: greeks.delta,
            gamma: greeks.gamma,
            theta: greeks.theta,
            vega: greeks.vega,
            rho: greeks.rho,
            underlying_price: spot,
            implied_vol: sigma,
        });
    }

    if rows.is_empty() && starved > 0 {
        return Err(EngineError::InsufficientData(format!(
            "{} of {} option underlyings below {} observations",
            starved,
            options.len(),
            MIN_OBSERVATIONS
        )));
    }

    rows.sort_by_key(|r| r.position_id);
    Ok(rows)
}

struct Greeks {
    delta: f64,
    gamma: f64,
    theta: f64,
    vega: f64,
    rho: f64,
}

fn black_scholes_greeks(
    spot: f64,
    strike: f64,
    t: f64,
    rate: f64,
    sigma: f64,
    is_call: bool,
) -> Greeks {
    let sqrt_t = t.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
    let d2 = d1 - sigma * sqrt_t;

    let nd1 = norm_cdf(d1);
    let pdf_d1 = norm_pdf(d1);
    let discount = (-rate * t).exp();

    let delta = if is_call { nd1 } else { nd1 - 1.0 };
    let gamma = pdf_d1 / (spot * sigma * sqrt_t);
    // Theta per calendar day, vega and rho per percentage point
    let theta_annual = if is_call {
        -(spot * pdf_d1 * sigma) / (2.0 * sqrt_t) - rate * strike * discount * norm_cdf(d2)
    } else {
        -(spot * pdf_d1 * sigma) / (2.0 * sqrt_t) + rate * strike * discount * norm_cdf(-d2)
    };
    let vega = spot * pdf_d1 * sqrt_t / 100.0;
    let rho = if is_call {
        strike * t * discount * norm_cdf(d2) / 100.0
    } else {
        -strike * t * discount * norm_cdf(-d2) / 100.0
    };

    Greeks {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
        rho,
    }
}

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal CDF via the Abramowitz-Stegun erf approximation,
/// accurate to ~1.5e-7 which is far below the noise in a realized-vol proxy.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();

    sign * y
}

fn realized_vol(closes: impl Iterator<Item = f64>) -> Option<f64> {
    let closes: Vec<f64> = closes.collect();
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
    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testutil::*;
    use crate::engines::MarketView;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn atm_call_delta_near_half() {
        // S=100, K=100, T=0.25, r=2%, sigma=20%
        let g = black_scholes_greeks(100.0, 100.0, 0.25, 0.02, 0.20, true);
        assert!(g.delta > 0.5 && g.delta < 0.6, "delta was {}", g.delta);
        assert!(g.gamma > 0.0);
        assert!(g.vega > 0.0);
        assert!(g.theta < 0.0);
    }

    #[test]
    fn put_call_delta_parity() {
        let call = black_scholes_greeks(100.0, 95.0, 0.5, 0.03, 0.25, true);
        let put = black_scholes_greeks(100.0, 95.0, 0.5, 0.03, 0.25, false);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-9);
        assert!((call.gamma - put.gamma).abs() < 1e-12);
    }

    #[test]
    fn norm_cdf_symmetry() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn equity_only_portfolio_yields_empty() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 60)));
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
    fn option_position_gets_greeks() {
        let portfolio_id = Uuid::new_v4();
        let as_of = date(2026, 2, 2);
        let mut view = MarketView::new(as_of);
        view.insert_bars("AAPL", &bars("AAPL", as_of, &trending_closes(150.0, 60)));

        let mut pos = position(portfolio_id, "AAPL", "2");
        pos.asset_kind = crate::models::AssetKind::OptionCall;
        pos.option_strike = Some(BigDecimal::from_str("160").unwrap());
        pos.option_expiry = Some(date(2026, 6, 19));

        let input = EngineInput {
            portfolio_id,
            as_of_date: as_of,
            positions: vec![pos],
            view,
            risk_free_rate: 0.045,
        };

        let rows = compute(&input).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].delta > 0.0 && rows[0].delta < 1.0);
        assert!(rows[0].implied_vol > 0.0);
    }
}
