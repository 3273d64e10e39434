//! 读数合成：按各污染物的取值范围独立均匀取值。
//!
//! 字段之间不做相关性建模；合成器本身无共享可变状态，
//! 随机源使用线程本地的 `rand::rng()`，任意 worker 可直接并发调用。

use chrono::NaiveDateTime;
use domain::{Pollutant, Reading};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

/// 合成器配置错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthError {
    #[error("invalid range for {pollutant}: [{min}, {max}]")]
    InvalidRange {
        pollutant: &'static str,
        min: f64,
        max: f64,
    },
}

/// 单个污染物的取值区间（闭区间）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollutantRange {
    pub min: f64,
    pub max: f64,
}

impl PollutantRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// 六项污染物的取值区间。
#[derive(Debug, Clone, PartialEq)]
pub struct PollutantRanges {
    pub pm25: PollutantRange,
    pub pm10: PollutantRange,
    pub co: PollutantRange,
    pub no2: PollutantRange,
    pub so2: PollutantRange,
    pub o3: PollutantRange,
}

impl Default for PollutantRanges {
    fn default() -> Self {
        Self {
            pm25: PollutantRange::new(0.0, 500.0),
            pm10: PollutantRange::new(0.0, 600.0),
            co: PollutantRange::new(0.0, 15.0),
            no2: PollutantRange::new(0.0, 200.0),
            so2: PollutantRange::new(0.0, 500.0),
            o3: PollutantRange::new(0.0, 300.0),
        }
    }
}

impl PollutantRanges {
    pub fn get(&self, pollutant: Pollutant) -> PollutantRange {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
            Pollutant::Co => self.co,
            Pollutant::No2 => self.no2,
            Pollutant::So2 => self.so2,
            Pollutant::O3 => self.o3,
        }
    }

    pub fn set(&mut self, pollutant: Pollutant, range: PollutantRange) {
        let slot = match pollutant {
            Pollutant::Pm25 => &mut self.pm25,
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::Co => &mut self.co,
            Pollutant::No2 => &mut self.no2,
            Pollutant::So2 => &mut self.so2,
            Pollutant::O3 => &mut self.o3,
        };
        *slot = range;
    }

    /// 在默认区间上覆盖指定污染物。
    pub fn with_overrides(
        overrides: impl IntoIterator<Item = (Pollutant, f64, f64)>,
    ) -> Result<Self, SynthError> {
        let mut ranges = Self::default();
        for (pollutant, min, max) in overrides {
            ranges.set(pollutant, PollutantRange::new(min, max));
        }
        ranges.validate()?;
        Ok(ranges)
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        for pollutant in Pollutant::ALL {
            let range = self.get(pollutant);
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(SynthError::InvalidRange {
                    pollutant: pollutant.column(),
                    min: range.min,
                    max: range.max,
                });
            }
        }
        Ok(())
    }
}

/// 读数合成器。
#[derive(Debug, Clone, Default)]
pub struct ReadingSynthesizer {
    ranges: PollutantRanges,
}

impl ReadingSynthesizer {
    pub fn new(ranges: PollutantRanges) -> Result<Self, SynthError> {
        ranges.validate()?;
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &PollutantRanges {
        &self.ranges
    }

    /// 合成一条读数；`id` 由调用方从 ID 生成器取得。
    pub fn synthesize(&self, id: u64, device_id: &str, monitor_time: NaiveDateTime) -> Reading {
        let mut rng = rand::rng();
        let mut draw = |pollutant: Pollutant| self.draw(&mut rng, pollutant);
        Reading {
            id,
            device_id: device_id.to_string(),
            monitor_time,
            pm25: draw(Pollutant::Pm25),
            pm10: draw(Pollutant::Pm10),
            co: draw(Pollutant::Co),
            no2: draw(Pollutant::No2),
            so2: draw(Pollutant::So2),
            o3: draw(Pollutant::O3),
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, pollutant: Pollutant) -> Decimal {
        let range = self.ranges.get(pollutant);
        let raw = if range.min == range.max {
            range.min
        } else {
            rng.random_range(range.min..=range.max)
        };
        let min = Decimal::from_f64(range.min).unwrap_or_default();
        let max = Decimal::from_f64(range.max).unwrap_or_default();
        Decimal::from_f64(raw)
            .unwrap_or(min)
            .round_dp(pollutant.scale())
            .clamp(min, max)
    }
}
