//! 时间步切分
//!
//! 时间序列为 `start + k * step`（k ≥ 0 且时刻 < end，半开区间），
//! 总步数 `ceil((end - start) / step)`。按 worker 数切成连续、互不重叠的下标区间，
//! 每段 `total / worker_count` 步，最后一段吸收余数；步数少于 worker 时前面的段为空。
//! 设置记录上限时先用 [`limit_end`] 收紧终点，产出是时间上连续的前缀。

use chrono::{NaiveDateTime, TimeDelta};
use domain::Granularity;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("invalid time range: start {start} must be earlier than end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("invalid granularity: {0}")]
    InvalidGranularity(String),
    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
}

/// 解析粒度（second/minute/hour、s/m/h、1/2/3）。
pub fn parse_granularity(value: &str) -> Result<Granularity, PartitionError> {
    value
        .parse::<Granularity>()
        .map_err(|_| PartitionError::InvalidGranularity(value.trim().to_string()))
}

/// 时间范围内的总步数。
pub fn total_steps(
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
) -> Result<u64, PartitionError> {
    if start >= end {
        return Err(PartitionError::InvalidRange { start, end });
    }
    let span = (end - start).num_seconds() as u64;
    Ok(span.div_ceil(granularity.step_seconds() as u64))
}

/// 记录上限对应的终点：`min(end, start + ceil(limit / device_count) * step)`。
///
/// 未设上限、没有设备或计算溢出时原样返回 `end`。
pub fn limit_end(
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
    device_count: usize,
    max_records: Option<u64>,
) -> NaiveDateTime {
    let Some(limit) = max_records else {
        return end;
    };
    if device_count == 0 {
        return end;
    }
    let steps = limit.div_ceil(device_count as u64);
    let clipped = i64::try_from(steps)
        .ok()
        .and_then(|steps| steps.checked_mul(granularity.step_seconds()))
        .and_then(TimeDelta::try_seconds)
        .and_then(|span| start.checked_add_signed(span));
    match clipped {
        Some(clipped) => clipped.min(end),
        None => end,
    }
}

/// 切分时间范围。
pub fn partition(
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
    worker_count: usize,
) -> Result<Vec<TimeStepRange>, PartitionError> {
    if worker_count == 0 {
        return Err(PartitionError::InvalidWorkerCount);
    }
    let total = total_steps(start, end, granularity)?;
    let workers = worker_count as u64;
    let per_worker = total / workers;

    Ok((0..workers)
        .map(|index| {
            let first = index * per_worker;
            let last = if index + 1 == workers {
                total
            } else {
                first + per_worker
            };
            TimeStepRange {
                origin: start,
                step_seconds: granularity.step_seconds(),
                indices: first..last,
                total,
            }
        })
        .collect())
}

/// 一个 worker 负责的时间步下标区间，按需计算时刻。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStepRange {
    origin: NaiveDateTime,
    step_seconds: i64,
    indices: Range<u64>,
    total: u64,
}

impl TimeStepRange {
    pub fn indices(&self) -> Range<u64> {
        self.indices.clone()
    }

    /// 整个时间范围（所有分段合计）的步数。
    pub fn total_steps(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> u64 {
        self.indices.end - self.indices.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 第 `index` 步（全局下标）对应的时刻。
    pub fn at(&self, index: u64) -> NaiveDateTime {
        self.origin + TimeDelta::seconds(self.step_seconds * index as i64)
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        (!self.is_empty()).then(|| self.at(self.indices.start))
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        (!self.is_empty()).then(|| self.at(self.indices.end - 1))
    }

    /// 按递增顺序遍历本区间的时刻；每次调用都从头开始。
    pub fn iter(&self) -> TimeSteps<'_> {
        TimeSteps {
            range: self,
            next: self.indices.clone(),
        }
    }
}

/// `TimeStepRange::iter` 的惰性迭代器。
#[derive(Debug, Clone)]
pub struct TimeSteps<'a> {
    range: &'a TimeStepRange,
    next: Range<u64>,
}

impl Iterator for TimeSteps<'_> {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.next().map(|index| self.range.at(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.next.size_hint()
    }
}

impl<'a> IntoIterator for &'a TimeStepRange {
    type Item = NaiveDateTime;
    type IntoIter = TimeSteps<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("time")
    }

    #[test]
    fn rejects_invalid_input() {
        assert_eq!(
            partition(at(1, 0, 0), at(0, 0, 0), Granularity::Minute, 2),
            Err(PartitionError::InvalidRange {
                start: at(1, 0, 0),
                end: at(0, 0, 0)
            })
        );
        assert!(matches!(
            partition(at(0, 0, 0), at(0, 0, 0), Granularity::Minute, 2),
            Err(PartitionError::InvalidRange { .. })
        ));
        assert_eq!(
            partition(at(0, 0, 0), at(1, 0, 0), Granularity::Minute, 0),
            Err(PartitionError::InvalidWorkerCount)
        );
        assert_eq!(
            parse_granularity("fortnight"),
            Err(PartitionError::InvalidGranularity("fortnight".to_string()))
        );
        assert_eq!(parse_granularity("2"), Ok(Granularity::Minute));
    }

    #[test]
    fn last_range_absorbs_remainder() {
        let ranges = partition(at(0, 0, 0), at(0, 10, 0), Granularity::Minute, 3).expect("ranges");
        let lens: Vec<u64> = ranges.iter().map(TimeStepRange::len).collect();
        assert_eq!(lens, vec![3, 3, 4]);
        assert_eq!(ranges[2].first(), Some(at(0, 6, 0)));
        assert_eq!(ranges[2].last(), Some(at(0, 9, 0)));
    }

    #[test]
    fn partial_final_step_is_included() {
        // 90 秒按分钟切分：00:00、00:01 两步。
        let ranges = partition(at(0, 0, 0), at(0, 1, 30), Granularity::Minute, 1).expect("ranges");
        let steps: Vec<_> = ranges[0].iter().collect();
        assert_eq!(steps, vec![at(0, 0, 0), at(0, 1, 0)]);
    }

    #[test]
    fn fewer_steps_than_workers_leaves_empty_ranges() {
        let ranges = partition(at(0, 0, 0), at(2, 0, 0), Granularity::Hour, 4).expect("ranges");
        assert_eq!(ranges.len(), 4);
        assert!(ranges[..3].iter().all(TimeStepRange::is_empty));
        assert_eq!(ranges[3].len(), 2);
        assert_eq!(ranges[0].first(), None);
    }

    #[test]
    fn record_limit_clips_end_to_covering_steps() {
        // 100 条、3 台设备：ceil(100 / 3) = 34 步，最后一步是 00:33。
        let end = limit_end(at(0, 0, 0), at(1, 0, 0), Granularity::Minute, 3, Some(100));
        assert_eq!(end, at(0, 34, 0));
        let ranges = partition(at(0, 0, 0), end, Granularity::Minute, 4).expect("ranges");
        assert_eq!(ranges[3].last(), Some(at(0, 33, 0)));
        assert!(ranges.iter().all(|range| range.total_steps() == 34));
    }

    #[test]
    fn record_limit_never_extends_end() {
        let end = at(0, 10, 0);
        assert_eq!(
            limit_end(at(0, 0, 0), end, Granularity::Minute, 3, Some(1_000)),
            end
        );
        assert_eq!(limit_end(at(0, 0, 0), end, Granularity::Minute, 3, None), end);
        assert_eq!(
            limit_end(at(0, 0, 0), end, Granularity::Minute, 0, Some(5)),
            end
        );
        assert_eq!(
            limit_end(at(0, 0, 0), end, Granularity::Hour, 2, Some(u64::MAX)),
            end
        );
    }

    #[test]
    fn iteration_is_restartable() {
        let ranges = partition(at(0, 0, 0), at(0, 0, 5), Granularity::Second, 1).expect("ranges");
        let first: Vec<_> = ranges[0].iter().collect();
        let second: Vec<_> = (&ranges[0]).into_iter().collect();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }
}
