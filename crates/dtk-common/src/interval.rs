use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Deserializer};

/// Fixed spacing between consecutive datapoints of a metric.
///
/// Parsed from `<integer><unit>` (`"10min"`, `"1h"`, `"90s"`, `"7days"`) or
/// a plain integer meaning seconds. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    seconds: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("invalid interval format: '{0}'")]
    InvalidFormat(String),
    #[error("unknown time unit: '{0}'")]
    UnknownUnit(String),
    #[error("interval must be positive")]
    NotPositive,
}

impl Interval {
    pub fn from_seconds(seconds: i64) -> Result<Self, IntervalError> {
        if seconds <= 0 {
            return Err(IntervalError::NotPositive);
        }
        Ok(Self {
            seconds: seconds as u64,
        })
    }

    pub fn parse(spec: &str) -> Result<Self, IntervalError> {
        let spec = spec.trim();
        let digits: String = spec.chars().take_while(|c| c.is_ascii_digit()).collect();
        let unit = &spec[digits.len()..];
        if digits.is_empty() || unit.is_empty() {
            return Err(IntervalError::InvalidFormat(spec.to_string()));
        }
        let count: i64 = digits
            .parse()
            .map_err(|_| IntervalError::InvalidFormat(spec.to_string()))?;
        let per_unit = match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 3600,
            "d" | "day" | "days" => 86400,
            other => return Err(IntervalError::UnknownUnit(other.to_string())),
        };
        Self::from_seconds(count * per_unit)
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds as i64)
    }

    /// Truncate `t` to the largest grid multiple of this interval `<= t`.
    pub fn align(&self, t: NaiveDateTime) -> NaiveDateTime {
        let secs = t.and_utc().timestamp();
        let step = self.seconds as i64;
        let aligned = secs - secs.rem_euclid(step);
        chrono::DateTime::from_timestamp(aligned, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or(t)
    }

    /// The grid instant following `t`.
    pub fn next(&self, t: NaiveDateTime) -> NaiveDateTime {
        t + self.duration()
    }

    /// Every aligned instant in `[from, to)`.
    pub fn range(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<NaiveDateTime> {
        let mut out = Vec::new();
        let mut t = self.align(from);
        if t < from {
            t = self.next(t);
        }
        while t < to {
            out.push(t);
            t = self.next(t);
        }
        out
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.seconds;
        if s % 86400 == 0 {
            write!(f, "{}d", s / 86400)
        } else if s % 3600 == 0 {
            write!(f, "{}h", s / 3600)
        } else if s % 60 == 0 {
            write!(f, "{}min", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

/// YAML lets users write `interval: 600` or `interval: 10min`.
impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(i64),
            Spec(String),
        }
        let raw = Raw::deserialize(deserializer)?;
        let parsed = match raw {
            Raw::Seconds(s) => Interval::from_seconds(s),
            Raw::Spec(s) => Interval::parse(&s),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_every_unit_family() {
        assert_eq!(Interval::parse("30s").unwrap().seconds(), 30);
        assert_eq!(Interval::parse("120sec").unwrap().seconds(), 120);
        assert_eq!(Interval::parse("10min").unwrap().seconds(), 600);
        assert_eq!(Interval::parse("1m").unwrap().seconds(), 60);
        assert_eq!(Interval::parse("1h").unwrap().seconds(), 3600);
        assert_eq!(Interval::parse("2hour").unwrap().seconds(), 7200);
        assert_eq!(Interval::parse("1d").unwrap().seconds(), 86400);
        assert_eq!(Interval::parse("7days").unwrap().seconds(), 604800);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Interval::parse("10MIN").unwrap().seconds(), 600);
        assert_eq!(Interval::parse("1H").unwrap().seconds(), 3600);
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!(
            Interval::parse("invalid"),
            Err(IntervalError::InvalidFormat("invalid".into()))
        );
        assert_eq!(
            Interval::parse("10"),
            Err(IntervalError::InvalidFormat("10".into()))
        );
        assert_eq!(
            Interval::parse("min10"),
            Err(IntervalError::InvalidFormat("min10".into()))
        );
        assert_eq!(
            Interval::parse("10xyz"),
            Err(IntervalError::UnknownUnit("xyz".into()))
        );
        assert_eq!(Interval::parse("0min"), Err(IntervalError::NotPositive));
        assert_eq!(Interval::from_seconds(-600), Err(IntervalError::NotPositive));
    }

    #[test]
    fn equality_across_spellings() {
        assert_eq!(Interval::from_seconds(600).unwrap(), Interval::parse("10min").unwrap());
        assert_ne!(Interval::parse("1d").unwrap(), Interval::parse("1h").unwrap());
    }

    #[test]
    fn display_prefers_largest_unit() {
        assert_eq!(Interval::from_seconds(60).unwrap().to_string(), "1min");
        assert_eq!(Interval::from_seconds(3600).unwrap().to_string(), "1h");
        assert_eq!(Interval::from_seconds(86400).unwrap().to_string(), "1d");
        assert_eq!(Interval::from_seconds(90).unwrap().to_string(), "90s");
    }

    #[test]
    fn align_truncates_to_grid() {
        let i = Interval::parse("10min").unwrap();
        assert_eq!(i.align(ts(13, 23, 45)), ts(13, 20, 0));
        assert_eq!(i.align(ts(13, 20, 0)), ts(13, 20, 0));

        let h = Interval::parse("1h").unwrap();
        assert_eq!(h.align(ts(13, 45, 0)), ts(13, 0, 0));
    }

    #[test]
    fn range_is_half_open_and_aligned() {
        let i = Interval::parse("10min").unwrap();
        let points = i.range(ts(0, 0, 0), ts(0, 30, 0));
        assert_eq!(points, vec![ts(0, 0, 0), ts(0, 10, 0), ts(0, 20, 0)]);

        // Unaligned `from` starts at the next grid point.
        let points = i.range(ts(0, 5, 0), ts(0, 30, 0));
        assert_eq!(points, vec![ts(0, 10, 0), ts(0, 20, 0)]);

        assert!(i.range(ts(1, 0, 0), ts(1, 0, 0)).is_empty());
    }

    #[test]
    fn deserializes_from_int_and_string() {
        #[derive(Deserialize)]
        struct Holder {
            interval: Interval,
        }
        let a: Holder = serde_yaml::from_str("interval: 600").unwrap();
        let b: Holder = serde_yaml::from_str("interval: 10min").unwrap();
        assert_eq!(a.interval, b.interval);
    }
}
