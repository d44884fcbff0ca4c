//! Interval strings such as `15s`, `30m`, `2h` or `1d`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::Deserialize;

/// Errors from parsing an interval string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("'{0}' is not an interval (expected <number><s|m|h|d>)")]
    Format(String),

    #[error("interval '{0}' must be greater than zero")]
    Zero(String),

    #[error("interval '{0}' exceeds the maximum of {MAX_INTERVAL_DAYS}d")]
    Overflow(String),
}

/// Longest interval a routine may be configured with.
pub const MAX_INTERVAL_DAYS: u64 = 365;

/// A positive duration written as `<integer><unit>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Interval(Duration);

impl Interval {
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d+)\s*([smhd])\s*$").unwrap())
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = pattern()
            .captures(s)
            .ok_or_else(|| IntervalError::Format(s.to_string()))?;

        let amount: u64 = captures[1]
            .parse()
            .map_err(|_| IntervalError::Overflow(s.to_string()))?;
        if amount == 0 {
            return Err(IntervalError::Zero(s.to_string()));
        }

        let unit_secs = match &captures[2] {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            _ => 24 * 60 * 60,
        };
        let secs = amount
            .checked_mul(unit_secs)
            .filter(|secs| *secs <= MAX_INTERVAL_DAYS * 24 * 60 * 60)
            .ok_or_else(|| IntervalError::Overflow(s.to_string()))?;
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Duration> for Interval {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        match secs {
            s if s % 86_400 == 0 && s > 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 && s > 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 && s > 0 => write!(f, "{}m", s / 60),
            s if s > 0 => write!(f, "{}s", s),
            _ => write!(f, "{}ms", self.0.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!("15s".parse::<Interval>().unwrap().as_duration(), Duration::from_secs(15));
        assert_eq!("30m".parse::<Interval>().unwrap().as_duration(), Duration::from_secs(1800));
        assert_eq!(" 2h ".parse::<Interval>().unwrap().as_duration(), Duration::from_secs(7200));
        assert_eq!("1d".parse::<Interval>().unwrap().as_duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!("30".parse::<Interval>(), Err(IntervalError::Format(_))));
        assert!(matches!("m".parse::<Interval>(), Err(IntervalError::Format(_))));
        assert!(matches!("5w".parse::<Interval>(), Err(IntervalError::Format(_))));
        assert!(matches!("-5m".parse::<Interval>(), Err(IntervalError::Format(_))));
        assert!(matches!("0s".parse::<Interval>(), Err(IntervalError::Zero(_))));
        assert!(matches!(
            "99999999999999999999d".parse::<Interval>(),
            Err(IntervalError::Overflow(_))
        ));
    }

    #[test]
    fn test_interval_is_capped_at_a_year() {
        assert_eq!(
            "365d".parse::<Interval>().unwrap().as_duration(),
            Duration::from_secs(MAX_INTERVAL_DAYS * 86_400)
        );
        assert_eq!("8760h".parse::<Interval>().unwrap().to_string(), "365d");
        assert!(matches!("366d".parse::<Interval>(), Err(IntervalError::Overflow(_))));
        assert!(matches!(
            "200000000000000d".parse::<Interval>(),
            Err(IntervalError::Overflow(_))
        ));
    }

    #[test]
    fn test_display_uses_largest_unit() {
        assert_eq!("90m".parse::<Interval>().unwrap().to_string(), "90m");
        assert_eq!("120m".parse::<Interval>().unwrap().to_string(), "2h");
        assert_eq!(Interval::from(Duration::from_millis(50)).to_string(), "50ms");
    }
}
