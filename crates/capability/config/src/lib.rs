//! 应用运行配置加载。
//!
//! - `AppConfig`：连接、池、批量与 worker 参数（环境变量，均有默认值）
//! - `RunRequest`：一次生成任务的时间范围、粒度与设备数

use chrono::NaiveDateTime;
use domain::{Granularity, MAX_DEVICES, Pollutant, parse_monitor_time};
use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("invalid run request: {0}")]
    InvalidRequest(String),
}

/// 数据库连接目标：完整 URL 或分项参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Url(String),
    Params {
        host: String,
        port: u16,
        user: String,
        password: Option<String>,
        database: String,
    },
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseTarget,
    pub pool_size: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub flush_interval_ms: u64,
    pub acquire_timeout_ms: u64,
    pub acquire_retries: u32,
    pub acquire_backoff_ms: u64,
    pub write_retries: u32,
    pub progress_interval_ms: u64,
    pub instance_id: u64,
    pub ensure_schema: bool,
    /// 污染物取值范围覆盖（`AQ_RANGE_<FIELD>=min,max`）。
    pub range_overrides: Vec<(Pollutant, f64, f64)>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = match read_optional("AQ_DATABASE_URL") {
            Some(url) => DatabaseTarget::Url(url),
            None => DatabaseTarget::Params {
                host: env::var("AQ_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: read_u16_with_default("AQ_DB_PORT", 5432)?,
                user: env::var("AQ_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: read_optional("AQ_DB_PASSWORD"),
                database: env::var("AQ_DB_NAME").unwrap_or_else(|_| "air_quality".to_string()),
            },
        };
        let pool_size = read_positive_with_default("AQ_POOL_SIZE", 4)?;
        let batch_size = read_positive_with_default("AQ_BATCH_SIZE", 1000)?;
        let workers = read_positive_with_default("AQ_WORKERS", 4)?;
        let flush_interval_ms = read_u64_with_default("AQ_FLUSH_INTERVAL_MS", 1000)?;
        let acquire_timeout_ms = read_u64_with_default("AQ_ACQUIRE_TIMEOUT_MS", 5000)?;
        let acquire_retries = read_u32_with_default("AQ_ACQUIRE_RETRIES", 3)?;
        let acquire_backoff_ms = read_u64_with_default("AQ_ACQUIRE_BACKOFF_MS", 200)?;
        let write_retries = read_u32_with_default("AQ_WRITE_RETRIES", 0)?;
        let progress_interval_ms = read_u64_with_default("AQ_PROGRESS_INTERVAL_MS", 1000)?;
        let instance_id = read_u64_with_default("AQ_INSTANCE_ID", 42)?;
        let ensure_schema = read_bool_with_default("AQ_ENSURE_SCHEMA", false);

        let mut range_overrides = Vec::new();
        for pollutant in Pollutant::ALL {
            let key = format!("AQ_RANGE_{}", pollutant.column().to_ascii_uppercase());
            if let Some(value) = read_optional(&key) {
                let (min, max) = parse_range(&key, &value)?;
                range_overrides.push((pollutant, min, max));
            }
        }

        Ok(Self {
            database,
            pool_size,
            batch_size,
            workers,
            flush_interval_ms,
            acquire_timeout_ms,
            acquire_retries,
            acquire_backoff_ms,
            write_retries,
            progress_interval_ms,
            instance_id,
            ensure_schema,
            range_overrides,
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn acquire_backoff(&self) -> Duration {
        Duration::from_millis(self.acquire_backoff_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// 一次生成任务的输入。
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub granularity: Granularity,
    pub device_count: usize,
    /// 全局记录上限（None 表示不限）。
    pub max_records: Option<u64>,
}

impl RunRequest {
    /// 构造并校验：结束时间晚于开始时间、设备数 1..=100、记录上限大于 0。
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        granularity: Granularity,
        device_count: usize,
        max_records: Option<u64>,
    ) -> Result<Self, ConfigError> {
        if end <= start {
            return Err(ConfigError::InvalidRequest(format!(
                "end {end} must be later than start {start}"
            )));
        }
        if device_count == 0 || device_count > MAX_DEVICES {
            return Err(ConfigError::InvalidRequest(format!(
                "device count {device_count} outside 1..={MAX_DEVICES}"
            )));
        }
        if max_records == Some(0) {
            return Err(ConfigError::InvalidRequest(
                "max records must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            start,
            end,
            granularity,
            device_count,
            max_records,
        })
    }

    /// 从环境变量读取任务；未设置 `AQ_START` 时返回 `Ok(None)`（改用交互输入）。
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(start) = read_optional("AQ_START") else {
            return Ok(None);
        };
        let start = read_time("AQ_START", &start)?;
        let end = env::var("AQ_END").map_err(|_| ConfigError::Missing("AQ_END".to_string()))?;
        let end = read_time("AQ_END", &end)?;
        let granularity = match read_optional("AQ_GRANULARITY") {
            Some(value) => value
                .parse::<Granularity>()
                .map_err(|_| ConfigError::Invalid("AQ_GRANULARITY".to_string(), value))?,
            None => Granularity::Minute,
        };
        let device_count = read_u64_with_default("AQ_DEVICES", 1)? as usize;
        let max_records = read_optional_u64("AQ_MAX_RECORDS")?;
        Self::new(start, end, granularity, device_count, max_records).map(Some)
    }

    /// 预计记录数：时间步数 × 设备数（受记录上限约束）。
    pub fn expected_records(&self) -> u64 {
        let span = (self.end - self.start).num_seconds().max(0) as u64;
        let step = self.granularity.step_seconds() as u64;
        let total = span.div_ceil(step) * self.device_count as u64;
        match self.max_records {
            Some(limit) => total.min(limit),
            None => total,
        }
    }
}

fn read_time(key: &str, value: &str) -> Result<NaiveDateTime, ConfigError> {
    parse_monitor_time(value).map_err(|_| ConfigError::Invalid(key.to_string(), value.to_string()))
}

/// 解析 `min,max` 形式的取值范围。
fn parse_range(key: &str, value: &str) -> Result<(f64, f64), ConfigError> {
    let invalid = || ConfigError::Invalid(key.to_string(), value.to_string());
    let (min, max) = value.split_once(',').ok_or_else(invalid)?;
    let min = min.trim().parse::<f64>().map_err(|_| invalid())?;
    let max = max.trim().parse::<f64>().map_err(|_| invalid())?;
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(invalid());
    }
    Ok((min, max))
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取必须大于 0 的数量型配置。
fn read_positive_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_pairs() {
        assert_eq!(parse_range("K", "0, 12.5").expect("range"), (0.0, 12.5));
        assert!(parse_range("K", "5,1").is_err());
        assert!(parse_range("K", "5").is_err());
        assert!(parse_range("K", "a,b").is_err());
        assert!(parse_range("K", "0,inf").is_err());
    }
}
