//! 时间粒度与监测时间解析。

use chrono::{NaiveDateTime, TimeDelta};
use std::fmt;
use std::str::FromStr;

/// 时间解析错误。
#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("invalid granularity: {0}")]
    Granularity(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// 相邻两条读数之间的时间步长。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
}

impl Granularity {
    pub fn step(self) -> TimeDelta {
        match self {
            Granularity::Second => TimeDelta::seconds(1),
            Granularity::Minute => TimeDelta::minutes(1),
            Granularity::Hour => TimeDelta::hours(1),
        }
    }

    pub fn step_seconds(self) -> i64 {
        self.step().num_seconds()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = TimeParseError;

    /// 接受名称、缩写以及交互菜单编号（1/2/3）。
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" | "s" | "1" => Ok(Granularity::Second),
            "minute" | "minutes" | "m" | "2" => Ok(Granularity::Minute),
            "hour" | "hours" | "h" | "3" => Ok(Granularity::Hour),
            other => Err(TimeParseError::Granularity(other.to_string())),
        }
    }
}

const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// 解析监测时间（秒级，无时区）。
pub fn parse_monitor_time(value: &str) -> Result<NaiveDateTime, TimeParseError> {
    let value = value.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| TimeParseError::Timestamp(value.to_string()))
}
