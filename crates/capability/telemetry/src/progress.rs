//! Worker 进度计数与周期汇总
//!
//! 每个 worker 持有一个 `WorkerProgress`（全部为原子字段），
//! `ProgressReporter` 只做 Relaxed 读取，不参与写入链路，也不会阻塞 worker。

use chrono::{DateTime, NaiveDateTime};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info};

const NO_POSITION: i64 = i64::MIN;

/// Worker 状态机：`Idle → Running → (Draining | Cancelled) → Terminated`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Running = 1,
    /// 收到停止信号：刷写当前批次后退出。
    Draining = 2,
    /// 运行被致命错误中止：丢弃缓冲批次后退出。
    Cancelled = 3,
    Terminated = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            3 => WorkerState::Cancelled,
            _ => WorkerState::Terminated,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Cancelled => "cancelled",
            WorkerState::Terminated => "terminated",
        }
    }

    /// 状态机允许的迁移。
    pub fn can_transition(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Idle, Running)
                | (Running, Draining)
                | (Running, Cancelled)
                | (Running, Terminated)
                | (Draining, Terminated)
                | (Draining, Cancelled)
                | (Cancelled, Terminated)
        )
    }
}

/// 单个 worker 的进度计数。
#[derive(Debug)]
pub struct WorkerProgress {
    index: usize,
    generated: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
    position: AtomicI64,
    state: AtomicU8,
}

/// 某一时刻的 worker 进度快照。
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub index: usize,
    pub generated: u64,
    pub committed: u64,
    pub dropped: u64,
    /// 最近处理到的时间步。
    pub position: Option<NaiveDateTime>,
    pub state: WorkerState,
}

impl WorkerProgress {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            generated: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            position: AtomicI64::new(NO_POSITION),
            state: AtomicU8::new(WorkerState::Idle as u8),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record_generated(&self, count: u64) {
        self.generated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_committed(&self, count: u64) {
        self.committed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_position(&self, position: NaiveDateTime) {
        self.position
            .store(position.and_utc().timestamp(), Ordering::Relaxed);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 迁移到新状态；非法迁移返回 false 且状态不变。
    pub fn transition(&self, to: WorkerState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !WorkerState::from_u8(current).can_transition(to) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let position = match self.position.load(Ordering::Relaxed) {
            NO_POSITION => None,
            secs => DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc()),
        };
        WorkerSnapshot {
            index: self.index,
            generated: self.generated.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            position,
            state: self.state(),
        }
    }
}

/// 汇总结果。
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSummary {
    pub elapsed: Duration,
    pub generated: u64,
    pub committed: u64,
    pub dropped: u64,
    /// 生成速率（条/秒）。
    pub rate: f64,
    pub workers: usize,
    pub terminated: usize,
    pub per_worker: Vec<WorkerSnapshot>,
}

impl ProgressSummary {
    pub fn all_terminated(&self) -> bool {
        self.terminated == self.workers
    }
}

/// 周期性进度汇总器。
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    workers: Vec<Arc<WorkerProgress>>,
    started_at: Instant,
}

impl ProgressReporter {
    pub fn new(workers: Vec<Arc<WorkerProgress>>) -> Self {
        Self::with_start(workers, Instant::now())
    }

    pub fn with_start(workers: Vec<Arc<WorkerProgress>>, started_at: Instant) -> Self {
        Self {
            workers,
            started_at,
        }
    }

    /// 采样全部 worker 并汇总。
    pub fn summarize(&self) -> ProgressSummary {
        let per_worker: Vec<WorkerSnapshot> =
            self.workers.iter().map(|worker| worker.snapshot()).collect();
        let elapsed = self.started_at.elapsed();
        let generated = per_worker.iter().map(|w| w.generated).sum();
        let committed = per_worker.iter().map(|w| w.committed).sum();
        let dropped = per_worker.iter().map(|w| w.dropped).sum();
        let terminated = per_worker
            .iter()
            .filter(|w| w.state == WorkerState::Terminated)
            .count();
        ProgressSummary {
            elapsed,
            generated,
            committed,
            dropped,
            rate: rate(generated, elapsed),
            workers: per_worker.len(),
            terminated,
            per_worker,
        }
    }

    /// 启动周期汇总任务；`stop` 取消后输出最终汇总并返回。
    pub fn spawn(self, interval: Duration, stop: CancellationToken) -> JoinHandle<ProgressSummary> {
        let task = async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => log_summary(&self.summarize(), "progress"),
                }
            }
            let summary = self.summarize();
            log_summary(&summary, "progress_final");
            summary
        };
        tokio::spawn(task.in_current_span())
    }
}

fn rate(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        records as f64 / secs
    } else {
        0.0
    }
}

fn log_summary(summary: &ProgressSummary, event: &'static str) {
    let position = summary
        .per_worker
        .iter()
        .filter_map(|w| w.position)
        .max()
        .map(|p| p.to_string());
    info!(
        target: "aq.progress",
        event,
        generated = summary.generated,
        committed = summary.committed,
        dropped = summary.dropped,
        rate = format!("{:.2}", summary.rate),
        terminated = summary.terminated,
        workers = summary.workers,
        position = ?position,
        "progress_summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_illegal_transitions() {
        let progress = WorkerProgress::new(0);
        assert!(!progress.transition(WorkerState::Draining));
        assert!(progress.transition(WorkerState::Running));
        assert!(progress.transition(WorkerState::Draining));
        assert!(!progress.transition(WorkerState::Running));
        assert!(progress.transition(WorkerState::Terminated));
        assert!(!progress.transition(WorkerState::Cancelled));
        assert_eq!(progress.state(), WorkerState::Terminated);
    }

    #[test]
    fn rate_is_zero_without_elapsed_time() {
        assert_eq!(rate(100, Duration::ZERO), 0.0);
        assert_eq!(rate(100, Duration::from_secs(4)), 25.0);
    }
}
