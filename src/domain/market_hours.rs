use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};

/// Trading-session window at a fixed UTC offset, Monday through Friday.
///
/// The default matches NSE hours: 09:15-15:30 IST (UTC+05:30).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Offset of the exchange timezone from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 15, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
            utc_offset_minutes: 330,
        }
    }
}

impl MarketHours {
    pub fn new(open: NaiveTime, close: NaiveTime, utc_offset_minutes: i32) -> Self {
        Self {
            open,
            close,
            utc_offset_minutes,
        }
    }

    /// Whether the market is open at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let local = now + Duration::minutes(self.utc_offset_minutes as i64);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = match NaiveTime::from_hms_opt(local.hour(), local.minute(), local.second()) {
            Some(t) => t,
            None => return false,
        };
        self.open <= t && t <= self.close
    }

    pub fn is_open_now(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}
