use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};

/// US equity market holidays, observed dates.
///
/// Reloaded from this table at process start; extend the table when a new
/// year's schedule is published.
const US_MARKET_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2023
    (2023, 1, 2),
    (2023, 1, 16),
    (2023, 2, 20),
    (2023, 4, 7),
    (2023, 5, 29),
    (2023, 6, 19),
    (2023, 7, 4),
    (2023, 9, 4),
    (2023, 11, 23),
    (2023, 12, 25),
    // 2024
    (2024, 1, 1),
    (2024, 1, 15),
    (2024, 2, 19),
    (2024, 3, 29),
    (2024, 5, 27),
    (2024, 6, 19),
    (2024, 7, 4),
    (2024, 9, 2),
    (2024, 11, 28),
    (2024, 12, 25),
    // 2025
    (2025, 1, 1),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
    // 2027
    (2027, 1, 1),
    (2027, 1, 18),
    (2027, 2, 15),
    (2027, 3, 26),
    (2027, 5, 31),
    (2027, 6, 18),
    (2027, 7, 5),
    (2027, 9, 6),
    (2027, 11, 25),
    (2027, 12, 24),
];

/// Trading calendar over the embedded holiday table. Pure; no external state.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: std::collections::HashSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        let holidays = US_MARKET_HOLIDAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .collect();
        Self { holidays }
    }

    /// A weekday that is not a market holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Largest trading day at or before `now`, in the US/Eastern business-day
    /// sense: before ~09:30 ET the current day has not traded yet, so the
    /// previous trading day is returned.
    pub fn most_recent_trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        // Fixed-offset ET approximation, matching the refresh heuristics used
        // for intraday price staleness checks.
        let et = now - Duration::hours(5);
        let mut candidate = et.date_naive();
        if et.hour() < 9 || (et.hour() == 9 && et.minute() < 30) {
            candidate -= Duration::days(1);
        }
        while !self.is_trading_day(candidate) {
            candidate -= Duration::days(1);
        }
        candidate
    }

    /// All trading days in `(from, to]`, ascending.
    pub fn trading_days_between(&self, from_exclusive: NaiveDate, to_inclusive: NaiveDate) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = from_exclusive + Duration::days(1);
        while current <= to_inclusive {
            if self.is_trading_day(current) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }

    /// The trading day `n` trading days after `date` (or before, for negative `n`).
    pub fn add_trading_days(&self, date: NaiveDate, n: i64) -> NaiveDate {
        let step = if n >= 0 { 1 } else { -1 };
        let mut remaining = n.abs();
        let mut current = date;
        while remaining > 0 {
            current += Duration::days(step);
            if self.is_trading_day(current) {
                remaining -= 1;
            }
        }
        current
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekends_are_not_trading_days() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(date(2026, 1, 31))); // Saturday
        assert!(!cal.is_trading_day(date(2026, 2, 1))); // Sunday
        assert!(cal.is_trading_day(date(2026, 2, 2))); // Monday
    }

    #[test]
    fn holidays_are_not_trading_days() {
        let cal = TradingCalendar::new();
        assert!(!cal.is_trading_day(date(2026, 1, 1))); // New Year's Day
        assert!(!cal.is_trading_day(date(2026, 7, 3))); // July 4th observed
        assert!(!cal.is_trading_day(date(2025, 11, 27))); // Thanksgiving
    }

    #[test]
    fn most_recent_trading_day_skips_weekend() {
        let cal = TradingCalendar::new();
        // Sunday 2026-02-01 18:00 UTC -> Friday 2026-01-30
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 18, 0, 0).unwrap();
        assert_eq!(cal.most_recent_trading_day(now), date(2026, 1, 30));
    }

    #[test]
    fn most_recent_trading_day_before_open_uses_prior_day() {
        let cal = TradingCalendar::new();
        // Tuesday 2026-02-03 12:00 UTC is 07:00 ET, before the open
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 12, 0, 0).unwrap();
        assert_eq!(cal.most_recent_trading_day(now), date(2026, 2, 2));
    }

    #[test]
    fn most_recent_trading_day_after_open_is_same_day() {
        let cal = TradingCalendar::new();
        // Tuesday 2026-02-03 18:00 UTC is 13:00 ET
        let now = Utc.with_ymd_and_hms(2026, 2, 3, 18, 0, 0).unwrap();
        assert_eq!(cal.most_recent_trading_day(now), date(2026, 2, 3));
    }

    #[test]
    fn trading_days_between_excludes_start_includes_end() {
        let cal = TradingCalendar::new();
        let days = cal.trading_days_between(date(2026, 1, 30), date(2026, 2, 3));
        assert_eq!(days, vec![date(2026, 2, 2), date(2026, 2, 3)]);
    }

    #[test]
    fn trading_days_between_empty_when_range_inverted() {
        let cal = TradingCalendar::new();
        assert!(cal
            .trading_days_between(date(2026, 2, 3), date(2026, 2, 3))
            .is_empty());
        assert!(cal
            .trading_days_between(date(2026, 2, 3), date(2026, 1, 5))
            .is_empty());
    }

    #[test]
    fn trading_days_between_skips_holidays() {
        let cal = TradingCalendar::new();
        // Thanksgiving week 2026: Thursday 11-26 is a holiday
        let days = cal.trading_days_between(date(2026, 11, 24), date(2026, 11, 30));
        assert_eq!(
            days,
            vec![date(2026, 11, 25), date(2026, 11, 27), date(2026, 11, 30)]
        );
    }

    #[test]
    fn add_trading_days_forward_and_back() {
        let cal = TradingCalendar::new();
        assert_eq!(cal.add_trading_days(date(2026, 1, 30), 1), date(2026, 2, 2));
        assert_eq!(cal.add_trading_days(date(2026, 2, 2), -1), date(2026, 1, 30));
        assert_eq!(cal.add_trading_days(date(2026, 2, 2), 0), date(2026, 2, 2));
    }
}
