use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Portfolio {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Portfolio {
    pub fn is_active(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    EquityLong,
    EquityShort,
    OptionCall,
    OptionPut,
    Private,
}

impl AssetKind {
    pub fn is_option(self) -> bool {
        matches!(self, AssetKind::OptionCall | AssetKind::OptionPut)
    }

    /// Private holdings have no market symbol to price.
    pub fn is_listed(self) -> bool {
        !matches!(self, AssetKind::Private)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub asset_kind: AssetKind,
    pub quantity: BigDecimal,
    pub entry_price: BigDecimal,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub option_strike: Option<BigDecimal>,
    pub option_expiry: Option<NaiveDate>,
    pub investment_class: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Open-at-date invariant: not soft-deleted, entered on or before the
    /// date, not yet exited, and (for options) not expired.
    pub fn is_open_at(&self, date: NaiveDate) -> bool {
        if self.deleted_at.is_some() || self.entry_date > date {
            return false;
        }
        if let Some(exit) = self.exit_date {
            if exit <= date {
                return false;
            }
        }
        if self.asset_kind.is_option() {
            if let Some(expiry) = self.option_expiry {
                if expiry <= date {
                    return false;
                }
            }
        }
        true
    }

    pub fn signed_quantity(&self) -> f64 {
        let q = self.quantity.to_f64().unwrap_or(0.0);
        match self.asset_kind {
            AssetKind::EquityShort => -q.abs(),
            _ => q,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn equity(entry: NaiveDate, exit: Option<NaiveDate>) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            asset_kind: AssetKind::EquityLong,
            quantity: BigDecimal::from_str("10").unwrap(),
            entry_price: BigDecimal::from_str("150.00").unwrap(),
            entry_date: entry,
            exit_date: exit,
            option_strike: None,
            option_expiry: None,
            investment_class: None,
            deleted_at: None,
        }
    }

    #[test]
    fn open_window_respects_entry_and_exit() {
        let pos = equity(date(2026, 1, 5), Some(date(2026, 2, 1)));
        assert!(!pos.is_open_at(date(2026, 1, 2)));
        assert!(pos.is_open_at(date(2026, 1, 5)));
        assert!(pos.is_open_at(date(2026, 1, 30)));
        // Exit date itself is no longer open
        assert!(!pos.is_open_at(date(2026, 2, 1)));
    }

    #[test]
    fn expired_option_is_not_open() {
        let mut pos = equity(date(2026, 1, 5), None);
        pos.asset_kind = AssetKind::OptionCall;
        pos.option_strike = Some(BigDecimal::from_str("160").unwrap());
        pos.option_expiry = Some(date(2026, 1, 16));
        assert!(pos.is_open_at(date(2026, 1, 15)));
        assert!(!pos.is_open_at(date(2026, 1, 16)));
    }

    #[test]
    fn short_quantity_is_negative() {
        let mut pos = equity(date(2026, 1, 5), None);
        pos.asset_kind = AssetKind::EquityShort;
        assert_eq!(pos.signed_quantity(), -10.0);
    }
}
