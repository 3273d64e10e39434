//! 单个 worker：按时间步递增、逐设备生成读数并批量写入。
//!
//! 停止令牌在每个时间步与每次刷写之后检查（进入 Draining，刷写剩余批次）；
//! 中止令牌表示其他 worker 出现致命错误（进入 Cancelled，丢弃缓冲批次）。

use crate::batch::{BatchError, BatchWriter, FlushOutcome};
use crate::budget::RecordBudget;
use crate::error::PipelineError;
use crate::partition::TimeStepRange;
use aq_idgen::SnowflakeGenerator;
use aq_storage::{Connector, PoolError};
use aq_synth::ReadingSynthesizer;
use aq_telemetry::{WorkerProgress, WorkerState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// worker 结束方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// 全部时间步（或记录额度）处理完毕。
    Completed,
    /// 收到停止信号，剩余批次已刷写。
    Drained,
    /// 运行被中止，缓冲批次被丢弃。
    Cancelled,
    /// 本 worker 遇到致命错误。
    Failed,
}

impl WorkerOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerOutcome::Completed => "completed",
            WorkerOutcome::Drained => "drained",
            WorkerOutcome::Cancelled => "cancelled",
            WorkerOutcome::Failed => "failed",
        }
    }
}

/// 单个 worker 的统计。
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub index: usize,
    pub steps: u64,
    pub generated: u64,
    pub committed: u64,
    pub dropped: u64,
    pub batches: u64,
    pub order_violations: u64,
    pub outcome: WorkerOutcome,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub acquire_retries: u32,
    pub acquire_backoff: Duration,
    pub write_retries: u32,
}

pub(crate) struct Worker<C: Connector> {
    pub index: usize,
    pub range: TimeStepRange,
    pub devices: Arc<[String]>,
    pub ids: Arc<SnowflakeGenerator>,
    pub synth: Arc<ReadingSynthesizer>,
    pub budget: Arc<RecordBudget>,
    pub writer: BatchWriter<C>,
    pub progress: Arc<WorkerProgress>,
    pub retry: RetryPolicy,
    pub shutdown: CancellationToken,
    pub abort: CancellationToken,
}

impl<C: Connector> Worker<C> {
    /// 运行到 Terminated；致命错误会触发中止令牌并随报告一起返回。
    pub async fn run(mut self) -> (WorkerReport, Option<PipelineError>) {
        self.progress.transition(WorkerState::Running);
        info!(
            target: "aq.pipeline",
            worker = self.index,
            steps = self.range.len(),
            first = ?self.range.first(),
            last = ?self.range.last(),
            devices = self.devices.len(),
            "worker_started"
        );

        let result = match self.generate().await {
            Ok(()) => self.finish().await,
            Err(err) => Err(err),
        };
        let (outcome, failure) = match result {
            Ok(outcome) => (outcome, None),
            Err(err) => {
                error!(target: "aq.pipeline", worker = self.index, error = %err, "worker_failed");
                self.abort.cancel();
                self.cancel_buffered();
                (WorkerOutcome::Failed, Some(err))
            }
        };

        self.progress.transition(WorkerState::Terminated);
        let report = self.report(outcome);
        info!(
            target: "aq.pipeline",
            worker = self.index,
            outcome = outcome.as_str(),
            generated = report.generated,
            committed = report.committed,
            dropped = report.dropped,
            "worker_terminated"
        );
        (report, failure)
    }

    async fn generate(&mut self) -> Result<(), PipelineError> {
        let range = self.range.clone();
        let devices = self.devices.clone();
        for (step, time) in range.indices().zip(range.iter()) {
            if self.interrupted() {
                return Ok(());
            }
            let wanted = self
                .budget
                .step_quota(step, range.total_steps(), devices.len() as u64);
            let granted = self.budget.try_reserve(wanted) as usize;
            if granted == 0 {
                info!(target: "aq.pipeline", worker = self.index, "record_budget_exhausted");
                return Ok(());
            }
            self.progress.set_position(time);

            for device in devices.iter().take(granted) {
                let id = self.ids.next_id()?;
                let reading = self.synth.synthesize(id, device, time);
                self.progress.record_generated(1);
                let result = self.writer.add(reading).await;
                let flushed = !matches!(result, Ok(None));
                self.settle(result).await?;
                if flushed && self.interrupted() {
                    return Ok(());
                }
            }
            if granted < devices.len() {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<WorkerOutcome, PipelineError> {
        if self.abort.is_cancelled() {
            self.cancel_buffered();
            return Ok(WorkerOutcome::Cancelled);
        }
        let outcome = if self.shutdown.is_cancelled() {
            self.progress.transition(WorkerState::Draining);
            info!(
                target: "aq.pipeline",
                worker = self.index,
                pending = self.writer.len(),
                "worker_draining"
            );
            WorkerOutcome::Drained
        } else {
            WorkerOutcome::Completed
        };

        let result = self.writer.flush().await;
        self.settle(result).await?;
        if self.progress.state() == WorkerState::Cancelled {
            return Ok(WorkerOutcome::Cancelled);
        }
        Ok(outcome)
    }

    /// 处理一次刷写结果：连接池失败按线性退避重试，写入失败按配置重试后丢弃。
    async fn settle(
        &mut self,
        mut result: Result<Option<FlushOutcome>, BatchError>,
    ) -> Result<(), PipelineError> {
        let mut acquire_failures = 0u32;
        let mut write_failures = 0u32;
        loop {
            match result {
                Ok(Some(outcome)) => {
                    self.progress.record_committed(outcome.rows);
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Err(BatchError::Pool(PoolError::Closed)) => {
                    return Err(PipelineError::Pool(PoolError::Closed));
                }
                Err(BatchError::Pool(err)) => {
                    acquire_failures += 1;
                    if acquire_failures > self.retry.acquire_retries {
                        return Err(if err.is_transient() {
                            PipelineError::PoolExhausted {
                                attempts: acquire_failures,
                                source: err,
                            }
                        } else {
                            PipelineError::Pool(err)
                        });
                    }
                    let backoff = self.retry.acquire_backoff * acquire_failures;
                    warn!(
                        target: "aq.pipeline",
                        worker = self.index,
                        attempt = acquire_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "acquire_retry"
                    );
                    let aborted = tokio::select! {
                        _ = self.abort.cancelled() => true,
                        _ = tokio::time::sleep(backoff) => false,
                    };
                    if aborted {
                        self.cancel_buffered();
                        return Ok(());
                    }
                }
                Err(BatchError::Write(failure)) => {
                    write_failures += 1;
                    if write_failures > self.retry.write_retries {
                        let dropped = self.writer.discard();
                        self.progress.record_dropped(dropped as u64);
                        warn!(
                            target: "aq.pipeline",
                            worker = self.index,
                            rows = dropped,
                            attempts = write_failures,
                            error = %failure,
                            "batch_dropped"
                        );
                        return Ok(());
                    }
                    warn!(
                        target: "aq.pipeline",
                        worker = self.index,
                        attempt = write_failures,
                        error = %failure,
                        "batch_write_retry"
                    );
                }
            }
            if self.abort.is_cancelled() {
                self.cancel_buffered();
                return Ok(());
            }
            result = self.writer.flush().await;
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.is_cancelled() || self.abort.is_cancelled()
    }

    /// 进入 Cancelled 并丢弃缓冲批次。
    fn cancel_buffered(&mut self) {
        self.progress.transition(WorkerState::Cancelled);
        let dropped = self.writer.discard();
        if dropped > 0 {
            self.progress.record_dropped(dropped as u64);
            warn!(target: "aq.pipeline", worker = self.index, rows = dropped, "batch_discarded");
        }
    }

    fn report(&self, outcome: WorkerOutcome) -> WorkerReport {
        let snapshot = self.progress.snapshot();
        WorkerReport {
            index: self.index,
            steps: self.range.len(),
            generated: snapshot.generated,
            committed: snapshot.committed,
            dropped: snapshot.dropped,
            batches: self.writer.committed_batches(),
            order_violations: self.writer.order_violations(),
            outcome,
        }
    }
}
