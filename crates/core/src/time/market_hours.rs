use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const DEFAULT_UTC_OFFSET_MINUTES: i32 = -5 * 60;

/// Regular session of the exchange, expressed in a fixed UTC offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketCalendar {
    pub utc_offset_minutes: i32,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub holidays: Vec<NaiveDate>,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self {
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            holidays: Vec::new(),
        }
    }
}

impl MarketCalendar {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date at the exchange for a UTC instant.
    pub fn local_date(&self, now_utc: DateTime<Utc>) -> NaiveDate {
        now_utc.with_timezone(&self.offset()).date_naive()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.configured_holidays().contains(&date)
    }

    pub fn is_open(&self, now_utc: DateTime<Utc>) -> bool {
        let local = now_utc.with_timezone(&self.offset());
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let t = local.time();
        t >= self.open && t < self.close
    }

    pub fn previous_business_day(&self, date: NaiveDate) -> NaiveDate {
        let holidays = self.configured_holidays();
        let mut d = date - Duration::days(1);
        while is_weekend(d) || holidays.contains(&d) {
            d = d - Duration::days(1);
        }
        d
    }

    /// Market date an end-of-day run refers to. Before the close it is the previous
    /// session; weekends and holidays roll back.
    pub fn resolve_as_of_date(
        &self,
        as_of_date_arg: Option<&str>,
        now_utc: DateTime<Utc>,
    ) -> anyhow::Result<NaiveDate> {
        if let Some(s) = as_of_date_arg {
            return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
        }

        let local = now_utc.with_timezone(&self.offset());
        let today = local.date_naive();
        if self.is_trading_day(today) && local.time() >= self.close {
            return Ok(today);
        }
        Ok(self.previous_business_day(today))
    }

    fn configured_holidays(&self) -> HashSet<NaiveDate> {
        // Extend via MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
        let mut out: HashSet<NaiveDate> = self.holidays.iter().copied().collect();
        for y in 2024..=2030 {
            if let Some(d) = NaiveDate::from_ymd_opt(y, 1, 1) {
                out.insert(d);
            }
            if let Some(d) = NaiveDate::from_ymd_opt(y, 12, 25) {
                out.insert(d);
            }
        }

        if let Ok(s) = std::env::var("MARKET_HOLIDAYS") {
            for part in s.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                    out.insert(d);
                }
            }
        }

        out
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn open_during_regular_session_only() {
        let cal = MarketCalendar::default();
        // 2026-03-04 is a Wednesday; 15:00 UTC = 10:00 at UTC-5.
        let during = Utc.with_ymd_and_hms(2026, 3, 4, 15, 0, 0).unwrap();
        assert!(cal.is_open(during));

        // 13:00 UTC = 08:00 local, before the open.
        let before = Utc.with_ymd_and_hms(2026, 3, 4, 13, 0, 0).unwrap();
        assert!(!cal.is_open(before));

        // Saturday.
        let weekend = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        assert!(!cal.is_open(weekend));
    }

    #[test]
    fn local_date_uses_exchange_offset() {
        let cal = MarketCalendar::default();
        // 02:00 UTC on the 5th is still the 4th at UTC-5.
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 2, 0, 0).unwrap();
        assert_eq!(cal.local_date(now), NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());
    }

    #[test]
    fn as_of_date_rolls_back_before_close_and_over_weekend() {
        let cal = MarketCalendar::default();
        // Monday 2026-03-09 15:00 UTC = 10:00 local, before the close.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 15, 0, 0).unwrap();
        assert_eq!(
            cal.resolve_as_of_date(None, now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 6).unwrap()
        );

        // Same Monday 22:00 UTC = 17:00 local, after the close.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 22, 0, 0).unwrap();
        assert_eq!(
            cal.resolve_as_of_date(None, now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
        );
    }

    #[test]
    fn previous_business_day_skips_holidays() {
        let cal = MarketCalendar {
            holidays: vec![NaiveDate::from_ymd_opt(2026, 7, 3).unwrap()],
            ..MarketCalendar::default()
        };
        // Monday 2026-07-06 → Friday 07-03 is a holiday → Thursday 07-02.
        let d = cal.previous_business_day(NaiveDate::from_ymd_opt(2026, 7, 6).unwrap());
        assert_eq!(d, NaiveDate::from_ymd_opt(2026, 7, 2).unwrap());
    }
}
