//! # 雪花 ID 生成
//!
//! 64 位布局（高位到低位）：
//!
//! | 位数 | 含义 |
//! |------|------|
//! | 1    | 保留（恒为 0，保证 i64 非负） |
//! | 41   | 自 epoch 起的毫秒数 |
//! | 10   | 实例号（0–1023） |
//! | 12   | 毫秒内序列号 |
//!
//! 生成器状态只有一个 `AtomicU64`（毫秒数与序列号打包），通过 CAS 推进，
//! 因此同一实例签发的 ID 严格递增。毫秒内序列号耗尽时自旋等待下一毫秒，
//! 绝不回绕；时钟回拨直接报错，由调用方终止本次运行。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TIMESTAMP_BITS: u32 = 41;
pub const INSTANCE_BITS: u32 = 10;
pub const SEQUENCE_BITS: u32 = 12;

pub const MAX_INSTANCE: u64 = (1 << INSTANCE_BITS) - 1;
pub const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

const INSTANCE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + INSTANCE_BITS;

/// 默认实例号。
pub const DEFAULT_INSTANCE: u64 = 42;

/// ID 生成错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("clock moved backwards: last issued {last_ms}ms, now {now_ms}ms")]
    ClockRegression { last_ms: u64, now_ms: u64 },
    #[error("clock {now_ms}ms is before epoch {epoch_ms}ms")]
    BeforeEpoch { now_ms: u64, epoch_ms: u64 },
    #[error("timestamp {0}ms exceeds the 41-bit budget")]
    EpochOverflow(u64),
    #[error("instance id {0} out of range 0..=1023")]
    InvalidInstance(u64),
}

/// 毫秒时钟抽象（测试中可替换为手动时钟）。
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// 系统墙钟（Unix 毫秒）。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let now = std::time::SystemTime::now();
        let duration = now
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        duration.as_millis() as u64
    }
}

/// 手动推进的时钟。
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// ID 拆解结果（调试用）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdParts {
    /// 签发时刻（Unix 毫秒）。
    pub timestamp_ms: u64,
    pub instance: u64,
    pub sequence: u64,
}

/// 并发安全的雪花 ID 生成器。
pub struct SnowflakeGenerator {
    instance: u64,
    epoch_ms: u64,
    /// `(elapsed_ms << SEQUENCE_BITS) | sequence`，对应最近一次签发。
    state: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SnowflakeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeGenerator")
            .field("instance", &self.instance)
            .field("epoch_ms", &self.epoch_ms)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl SnowflakeGenerator {
    /// 使用系统时钟与 Unix epoch 创建生成器。
    pub fn new(instance: u64) -> Result<Self, IdError> {
        Self::with_clock(instance, 0, Arc::new(SystemClock))
    }

    pub fn with_clock(
        instance: u64,
        epoch_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdError> {
        if instance > MAX_INSTANCE {
            return Err(IdError::InvalidInstance(instance));
        }
        Ok(Self {
            instance,
            epoch_ms,
            state: AtomicU64::new(0),
            clock,
        })
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    /// 签发下一个 ID。
    ///
    /// 唯一可能阻塞的位置是毫秒内序列号耗尽后的自旋等待。
    pub fn next_id(&self) -> Result<u64, IdError> {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let last_ms = current >> SEQUENCE_BITS;
            let last_seq = current & MAX_SEQUENCE;
            let now = self.elapsed_ms()?;

            let next = if now > last_ms {
                if now > MAX_TIMESTAMP {
                    return Err(IdError::EpochOverflow(now));
                }
                now << SEQUENCE_BITS
            } else if now == last_ms {
                if last_seq == MAX_SEQUENCE {
                    self.wait_next_ms(last_ms)?;
                    continue;
                }
                current + 1
            } else {
                return Err(IdError::ClockRegression {
                    last_ms: last_ms + self.epoch_ms,
                    now_ms: now + self.epoch_ms,
                });
            };

            if self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(self.compose(next));
            }
        }
    }

    /// 拆解本实例 epoch 下的 ID。
    pub fn decompose(&self, id: u64) -> IdParts {
        decompose(id, self.epoch_ms)
    }

    fn compose(&self, state: u64) -> u64 {
        let elapsed = state >> SEQUENCE_BITS;
        let sequence = state & MAX_SEQUENCE;
        (elapsed << TIMESTAMP_SHIFT) | (self.instance << INSTANCE_SHIFT) | sequence
    }

    fn elapsed_ms(&self) -> Result<u64, IdError> {
        let now_ms = self.clock.now_ms();
        now_ms
            .checked_sub(self.epoch_ms)
            .ok_or(IdError::BeforeEpoch {
                now_ms,
                epoch_ms: self.epoch_ms,
            })
    }

    fn wait_next_ms(&self, last_ms: u64) -> Result<(), IdError> {
        loop {
            let now = self.elapsed_ms()?;
            if now > last_ms {
                return Ok(());
            }
            if now < last_ms {
                return Err(IdError::ClockRegression {
                    last_ms: last_ms + self.epoch_ms,
                    now_ms: now + self.epoch_ms,
                });
            }
            std::hint::spin_loop();
        }
    }
}

/// 按给定 epoch 拆解 ID。
pub fn decompose(id: u64, epoch_ms: u64) -> IdParts {
    IdParts {
        timestamp_ms: (id >> TIMESTAMP_SHIFT) + epoch_ms,
        instance: (id >> INSTANCE_SHIFT) & MAX_INSTANCE,
        sequence: id & MAX_SEQUENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manual(instance: u64, start_ms: u64) -> (Arc<ManualClock>, SnowflakeGenerator) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let generator =
            SnowflakeGenerator::with_clock(instance, 0, clock.clone()).expect("generator");
        (clock, generator)
    }

    #[test]
    fn ids_embed_timestamp_instance_and_sequence() {
        let (_clock, generator) = manual(42, 1_700_000_000_000);
        let first = generator.next_id().expect("first");
        let second = generator.next_id().expect("second");
        let parts = generator.decompose(second);
        assert!(second > first);
        assert_eq!(parts.timestamp_ms, 1_700_000_000_000);
        assert_eq!(parts.instance, 42);
        assert_eq!(parts.sequence, 1);
    }

    #[test]
    fn sequence_resets_on_new_millisecond() {
        let (clock, generator) = manual(1, 10);
        generator.next_id().expect("first");
        generator.next_id().expect("second");
        clock.advance(1);
        let id = generator.next_id().expect("third");
        let parts = generator.decompose(id);
        assert_eq!(parts.timestamp_ms, 11);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn clock_regression_fails_fast() {
        let (clock, generator) = manual(1, 1_000);
        generator.next_id().expect("first");
        clock.set(999);
        let err = generator.next_id().expect_err("regression");
        assert_eq!(
            err,
            IdError::ClockRegression {
                last_ms: 1_000,
                now_ms: 999
            }
        );
    }

    #[test]
    fn sequence_overflow_waits_for_next_millisecond() {
        let (clock, generator) = manual(3, 5);
        let mut last = 0;
        for _ in 0..=MAX_SEQUENCE {
            last = generator.next_id().expect("within budget");
        }
        assert_eq!(generator.decompose(last).sequence, MAX_SEQUENCE);

        let ticker = {
            let clock = clock.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                clock.advance(1);
            })
        };
        let next = generator.next_id().expect("after spin");
        ticker.join().expect("ticker");

        let parts = generator.decompose(next);
        assert!(next > last);
        assert_eq!(parts.timestamp_ms, 6);
        assert_eq!(parts.sequence, 0);
    }

    #[test]
    fn rejects_out_of_range_instance() {
        let err = SnowflakeGenerator::with_clock(1024, 0, Arc::new(SystemClock))
            .expect_err("instance");
        assert_eq!(err, IdError::InvalidInstance(1024));
    }

    #[test]
    fn clock_before_epoch_is_an_error() {
        let clock = Arc::new(ManualClock::new(10));
        let generator = SnowflakeGenerator::with_clock(0, 100, clock).expect("generator");
        assert!(matches!(
            generator.next_id(),
            Err(IdError::BeforeEpoch { .. })
        ));
    }
}
