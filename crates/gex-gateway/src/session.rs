use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Market session bucket, in US Eastern time.
///
/// The upstream provider throttles asymmetrically by session, and cached data
/// goes stale at very different rates across sessions, so both the rate
/// limiter and the gateway cache key off this single classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    Weekend,
    TradingHours,
    AfterHours,
}

impl Session {
    /// Classify an instant into a session bucket.
    pub fn bucket_at(now: DateTime<Utc>) -> Session {
        let et = now.with_timezone(&chrono_tz::US::Eastern);

        if et.weekday() == Weekday::Sat || et.weekday() == Weekday::Sun {
            return Session::Weekend;
        }

        let time_minutes = et.hour() * 60 + et.minute();
        let regular_open = 9 * 60 + 30;
        let regular_close = 16 * 60;

        if time_minutes >= regular_open && time_minutes < regular_close {
            Session::TradingHours
        } else {
            Session::AfterHours
        }
    }

    pub fn current() -> Session {
        Self::bucket_at(Utc::now())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Session::Weekend => "weekend",
            Session::TradingHours => "trading_hours",
            Session::AfterHours => "after_hours",
        }
    }
}

/// Per-session calls-per-minute ceilings.
/// Trading hours and weekends carry the strictest quotas, mirroring the
/// provider's own throttling asymmetry.
#[derive(Debug, Clone, Copy)]
pub struct SessionQuotas {
    pub weekend_per_min: usize,
    pub trading_hours_per_min: usize,
    pub after_hours_per_min: usize,
}

impl SessionQuotas {
    pub fn ceiling(&self, session: Session) -> usize {
        match session {
            Session::Weekend => self.weekend_per_min,
            Session::TradingHours => self.trading_hours_per_min,
            Session::AfterHours => self.after_hours_per_min,
        }
    }
}

impl Default for SessionQuotas {
    fn default() -> Self {
        Self {
            weekend_per_min: 5,
            trading_hours_per_min: 10,
            after_hours_per_min: 30,
        }
    }
}

/// Per-session cache TTLs: long on weekends (market closed, data static),
/// short during trading hours, medium on weekday off-hours.
#[derive(Debug, Clone, Copy)]
pub struct SessionTtls {
    pub weekend: Duration,
    pub trading_hours: Duration,
    pub after_hours: Duration,
}

impl SessionTtls {
    pub fn ttl(&self, session: Session) -> Duration {
        match session {
            Session::Weekend => self.weekend,
            Session::TradingHours => self.trading_hours,
            Session::AfterHours => self.after_hours,
        }
    }
}

impl Default for SessionTtls {
    fn default() -> Self {
        Self {
            weekend: Duration::from_secs(6 * 3600),
            trading_hours: Duration::from_secs(120),
            after_hours: Duration::from_secs(15 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn eastern(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::US::Eastern
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn saturday_is_weekend() {
        // 2025-06-14 is a Saturday
        assert_eq!(Session::bucket_at(eastern(2025, 6, 14, 11, 0)), Session::Weekend);
    }

    #[test]
    fn weekday_regular_hours() {
        // 2025-06-16 is a Monday
        assert_eq!(
            Session::bucket_at(eastern(2025, 6, 16, 9, 30)),
            Session::TradingHours
        );
        assert_eq!(
            Session::bucket_at(eastern(2025, 6, 16, 15, 59)),
            Session::TradingHours
        );
    }

    #[test]
    fn weekday_off_hours() {
        assert_eq!(
            Session::bucket_at(eastern(2025, 6, 16, 9, 29)),
            Session::AfterHours
        );
        assert_eq!(
            Session::bucket_at(eastern(2025, 6, 16, 16, 0)),
            Session::AfterHours
        );
        assert_eq!(
            Session::bucket_at(eastern(2025, 6, 16, 3, 0)),
            Session::AfterHours
        );
    }

    #[test]
    fn quota_and_ttl_lookup_follow_session() {
        let quotas = SessionQuotas::default();
        assert!(quotas.ceiling(Session::Weekend) < quotas.ceiling(Session::AfterHours));

        let ttls = SessionTtls::default();
        assert!(ttls.ttl(Session::Weekend) > ttls.ttl(Session::TradingHours));
    }
}
