//! Classification enums shared by the engine and every storage backend

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// RESOLUTION
// ============================================================================

/// Calendar granularity at which rollups are maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
    Month,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Second,
        Resolution::Minute,
        Resolution::Hour,
        Resolution::Day,
        Resolution::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    /// Start instant of the bucket containing `timestamp`.
    ///
    /// Calendar aware: month floors to day 1 at midnight, so variable month
    /// lengths and leap days need no special casing. Flooring an origin
    /// returns it unchanged.
    pub fn floor(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let Some(second) = timestamp.with_nanosecond(0) else {
            return timestamp;
        };
        let floored = match self {
            Self::Second => Some(second),
            Self::Minute => second.with_second(0),
            Self::Hour => second.with_second(0).and_then(|t| t.with_minute(0)),
            Self::Day => second
                .with_second(0)
                .and_then(|t| t.with_minute(0))
                .and_then(|t| t.with_hour(0)),
            Self::Month => second
                .with_second(0)
                .and_then(|t| t.with_minute(0))
                .and_then(|t| t.with_hour(0))
                .and_then(|t| t.with_day(1)),
        };
        floored.unwrap_or(second)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "second" => Ok(Self::Second),
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            other => Err(format!(
                "Invalid resolution '{}'. Valid values: second, minute, hour, day, month",
                other
            )),
        }
    }
}

// ============================================================================
// COLLECTION CLASS
// ============================================================================

/// Whether a collection holds raw event copies or bucket rollups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionClass {
    Raw,
    Aggregated,
}

impl CollectionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Aggregated => "aggregated",
        }
    }
}

impl fmt::Display for CollectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AGGREGATION METHOD
// ============================================================================

/// Statistic requested when reading aggregated records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Max,
    Min,
    Sum,
    Sum2,
    Occur,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Sum2 => "sum2",
            Self::Occur => "occur",
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            "sum2" => Ok(Self::Sum2),
            "occur" => Ok(Self::Occur),
            other => Err(format!(
                "Invalid aggregation method '{}'. Valid values: max, min, sum, sum2, occur",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_floor_each_resolution() {
        let t = ts(2024, 2, 29, 13, 47, 21) + chrono::TimeDelta::milliseconds(640);
        assert_eq!(Resolution::Second.floor(t), ts(2024, 2, 29, 13, 47, 21));
        assert_eq!(Resolution::Minute.floor(t), ts(2024, 2, 29, 13, 47, 0));
        assert_eq!(Resolution::Hour.floor(t), ts(2024, 2, 29, 13, 0, 0));
        assert_eq!(Resolution::Day.floor(t), ts(2024, 2, 29, 0, 0, 0));
        assert_eq!(Resolution::Month.floor(t), ts(2024, 2, 1, 0, 0, 0));
    }

    #[test]
    fn test_floor_is_idempotent() {
        let t = ts(2023, 12, 31, 23, 59, 59) + chrono::TimeDelta::microseconds(999_999);
        for resolution in Resolution::ALL {
            let once = resolution.floor(t);
            assert_eq!(resolution.floor(once), once, "{}", resolution);
        }
    }

    #[test]
    fn test_floor_month_end_boundaries() {
        assert_eq!(
            Resolution::Month.floor(ts(2023, 1, 31, 23, 59, 59)),
            ts(2023, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            Resolution::Month.floor(ts(2023, 3, 1, 0, 0, 0)),
            ts(2023, 3, 1, 0, 0, 0)
        );
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!("Hour".parse::<Resolution>(), Ok(Resolution::Hour));
        assert!("week".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_resolution_serde() {
        let r: Resolution = serde_json::from_str(r#""minute""#).unwrap();
        assert_eq!(r, Resolution::Minute);
        assert_eq!(serde_json::to_string(&Resolution::Month).unwrap(), r#""month""#);
    }

    #[test]
    fn test_aggregation_method_from_str() {
        assert_eq!("sum2".parse::<AggregationMethod>(), Ok(AggregationMethod::Sum2));
        assert!("avg".parse::<AggregationMethod>().is_err());
    }
}
