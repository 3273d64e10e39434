//! Worker 池：每个分片一个 tokio 任务，共享 ID 生成器、连接池与令牌。

use crate::batch::BatchWriter;
use crate::budget::RecordBudget;
use crate::error::PipelineError;
use crate::partition::TimeStepRange;
use crate::worker::{RetryPolicy, Worker, WorkerOutcome, WorkerReport};
use aq_idgen::SnowflakeGenerator;
use aq_storage::{ConnectionPool, Connector};
use aq_synth::ReadingSynthesizer;
use aq_telemetry::{WorkerProgress, WorkerState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id as TaskId, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

/// 运行参数。
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub batch_size: usize,
    /// 批次最长等待时间（到期强制提交）。
    pub max_batch_age: Duration,
    pub acquire_retries: u32,
    pub acquire_backoff: Duration,
    /// 单批写入失败后的重试次数（0 表示至多一次）。
    pub write_retries: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_batch_age: Duration::from_secs(1),
            acquire_retries: 3,
            acquire_backoff: Duration::from_millis(200),
            write_retries: 0,
        }
    }
}

/// 分配给一个 worker 的工作。
#[derive(Debug, Clone)]
pub struct WorkerAssignment {
    pub index: usize,
    pub range: TimeStepRange,
    pub devices: Arc<[String]>,
    pub progress: Arc<WorkerProgress>,
}

/// 一次运行的结果。
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workers: Vec<WorkerReport>,
    pub generated: u64,
    pub committed: u64,
    pub dropped: u64,
    pub elapsed: Duration,
    /// 是否由停止信号提前结束。
    pub interrupted: bool,
    pub closed_connections: usize,
}

impl RunReport {
    /// 平均提交速率（条/秒）。
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }
}

pub struct WorkerPool<C: Connector> {
    pool: ConnectionPool<C>,
    ids: Arc<SnowflakeGenerator>,
    synth: Arc<ReadingSynthesizer>,
    budget: Arc<RecordBudget>,
    settings: RunSettings,
    shutdown: CancellationToken,
    abort: CancellationToken,
    assignments: Vec<WorkerAssignment>,
}

impl<C: Connector> WorkerPool<C> {
    pub fn new(
        pool: ConnectionPool<C>,
        ids: Arc<SnowflakeGenerator>,
        synth: Arc<ReadingSynthesizer>,
        settings: RunSettings,
    ) -> Self {
        Self {
            pool,
            ids,
            synth,
            budget: Arc::new(RecordBudget::unlimited()),
            settings,
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            assignments: Vec::new(),
        }
    }

    pub fn with_budget(mut self, budget: RecordBudget) -> Self {
        self.budget = Arc::new(budget);
        self
    }

    /// 使用外部停止令牌（例如绑定到 Ctrl+C）。
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// 每个时间分片分配一个 worker，所有 worker 负责全部设备。
    pub fn assign(mut self, ranges: Vec<TimeStepRange>, devices: Vec<String>) -> Self {
        let devices: Arc<[String]> = devices.into();
        self.assignments = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| WorkerAssignment {
                index,
                range,
                devices: devices.clone(),
                progress: Arc::new(WorkerProgress::new(index)),
            })
            .collect();
        self
    }

    pub fn assignments(&self) -> &[WorkerAssignment] {
        &self.assignments
    }

    /// 各 worker 的进度句柄（供进度汇总器读取）。
    pub fn progress(&self) -> Vec<Arc<WorkerProgress>> {
        self.assignments
            .iter()
            .map(|assignment| assignment.progress.clone())
            .collect()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// 启动全部 worker 并等待结束，随后关闭连接池。
    ///
    /// 返回运行报告，或第一个致命错误（此时其余 worker 已被中止并结束）。
    pub async fn run(self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let retry = RetryPolicy {
            acquire_retries: self.settings.acquire_retries,
            acquire_backoff: self.settings.acquire_backoff,
            write_retries: self.settings.write_retries,
        };
        info!(
            target: "aq.pipeline",
            workers = self.assignments.len(),
            pool_size = self.pool.size(),
            batch_size = self.settings.batch_size,
            "run_started"
        );

        let mut tasks = JoinSet::new();
        let mut task_index: HashMap<TaskId, usize> = HashMap::new();
        for assignment in &self.assignments {
            let worker = Worker {
                index: assignment.index,
                range: assignment.range.clone(),
                devices: assignment.devices.clone(),
                ids: self.ids.clone(),
                synth: self.synth.clone(),
                budget: self.budget.clone(),
                writer: BatchWriter::new(
                    self.pool.clone(),
                    assignment.index,
                    self.settings.batch_size,
                    self.settings.max_batch_age,
                ),
                progress: assignment.progress.clone(),
                retry,
                shutdown: self.shutdown.clone(),
                abort: self.abort.clone(),
            };
            let handle = tasks.spawn(worker.run().in_current_span());
            task_index.insert(handle.id(), assignment.index);
        }

        let mut reports: Vec<Option<WorkerReport>> = vec![None; self.assignments.len()];
        let mut first_error = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, (report, failure))) => {
                    if first_error.is_none() {
                        first_error = failure;
                    }
                    let index = report.index;
                    reports[index] = Some(report);
                }
                Err(err) => {
                    self.abort.cancel();
                    let index = task_index.get(&err.id()).copied();
                    let message = if err.is_panic() {
                        panic_message(err.into_panic())
                    } else {
                        err.to_string()
                    };
                    error!(
                        target: "aq.pipeline",
                        worker = ?index,
                        error = %message,
                        "worker_panicked"
                    );
                    if let Some(index) = index
                        && first_error.is_none()
                    {
                        first_error = Some(PipelineError::WorkerPanicked { index, message });
                    }
                }
            }
        }

        // 任务 panic 时没有报告，按进度快照补齐。
        let workers: Vec<WorkerReport> = self
            .assignments
            .iter()
            .zip(reports)
            .map(|(assignment, report)| report.unwrap_or_else(|| orphan_report(assignment)))
            .collect();

        let closed_connections = self.pool.close().await;
        let report = RunReport {
            generated: workers.iter().map(|w| w.generated).sum(),
            committed: workers.iter().map(|w| w.committed).sum(),
            dropped: workers.iter().map(|w| w.dropped).sum(),
            workers,
            elapsed: started.elapsed(),
            interrupted: self.shutdown.is_cancelled(),
            closed_connections,
        };
        info!(
            target: "aq.pipeline",
            generated = report.generated,
            committed = report.committed,
            dropped = report.dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            interrupted = report.interrupted,
            failed = first_error.is_some(),
            "run_finished"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

fn orphan_report(assignment: &WorkerAssignment) -> WorkerReport {
    let progress = &assignment.progress;
    progress.transition(WorkerState::Cancelled);
    progress.transition(WorkerState::Terminated);
    let snapshot = progress.snapshot();
    WorkerReport {
        index: assignment.index,
        steps: assignment.range.len(),
        generated: snapshot.generated,
        committed: snapshot.committed,
        dropped: snapshot.generated.saturating_sub(snapshot.committed),
        batches: 0,
        order_violations: 0,
        outcome: WorkerOutcome::Failed,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
