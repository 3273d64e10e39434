//! 一次生成任务的装配：配置 → 分片 → 连接池 → worker 池 → 汇总。

use crate::signal::wait_for_signal;
use aq_config::{AppConfig, DatabaseTarget, RunRequest};
use aq_idgen::{IdError, SnowflakeGenerator};
use aq_pipeline::{
    PartitionError, PipelineError, RecordBudget, RunReport, RunSettings, WorkerPool, limit_end,
    partition,
};
use aq_storage::{
    ConnectionPool, DbParams, PgConnector, PoolError, StorageError, options_from_url,
};
use aq_synth::{PollutantRanges, ReadingSynthesizer, SynthError};
use aq_telemetry::{ProgressReporter, ProgressSummary, new_run_id};
use domain::device_ids;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub fn settings_from(config: &AppConfig) -> RunSettings {
    RunSettings {
        batch_size: config.batch_size,
        max_batch_age: config.flush_interval(),
        acquire_retries: config.acquire_retries,
        acquire_backoff: config.acquire_backoff(),
        write_retries: config.write_retries,
    }
}

pub fn connector_from(config: &AppConfig) -> Result<PgConnector, StorageError> {
    let options = match &config.database {
        DatabaseTarget::Url(url) => options_from_url(url)?,
        DatabaseTarget::Params {
            host,
            port,
            user,
            password,
            database,
        } => DbParams {
            host: host.clone(),
            port: *port,
            user: user.clone(),
            password: password.clone(),
            database: database.clone(),
        }
        .to_options(),
    };
    Ok(PgConnector::new(options))
}

/// 执行一次生成任务；被信号中断时同样正常返回。
pub async fn execute(config: &AppConfig, request: &RunRequest) -> Result<RunReport, RunError> {
    let run_id = new_run_id();
    let span = info_span!("run", run_id = %run_id);
    execute_inner(config, request).instrument(span).await
}

async fn execute_inner(config: &AppConfig, request: &RunRequest) -> Result<RunReport, RunError> {
    // 配置类错误在连接数据库之前暴露
    let ranges = PollutantRanges::with_overrides(config.range_overrides.iter().copied())?;
    let synth = ReadingSynthesizer::new(ranges)?;
    let ids = SnowflakeGenerator::new(config.instance_id)?;
    // 有记录上限时只覆盖前 ceil(limit / devices) 步，产出是连续前缀
    let end = limit_end(
        request.start,
        request.end,
        request.granularity,
        request.device_count,
        request.max_records,
    );
    let partitions = partition(request.start, end, request.granularity, config.workers)?;

    info!(
        target: "aq.pipeline",
        start = %request.start,
        end = %end,
        granularity = %request.granularity,
        devices = request.device_count,
        max_records = ?request.max_records,
        expected = request.expected_records(),
        workers = config.workers,
        "run_planned"
    );

    let connector = connector_from(config)?;
    if config.ensure_schema {
        connector.ensure_schema().await?;
    }
    let pool = ConnectionPool::connect(connector, config.pool_size, config.acquire_timeout()).await?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(wait_for_signal(shutdown.clone()));

    let workers = WorkerPool::new(pool, Arc::new(ids), Arc::new(synth), settings_from(config))
        .with_budget(RecordBudget::new(request.max_records))
        .with_shutdown(shutdown)
        .assign(partitions, device_ids(request.device_count));

    let reporter_stop = CancellationToken::new();
    let reporter = ProgressReporter::new(workers.progress())
        .spawn(config.progress_interval(), reporter_stop.clone());

    let result = workers.run().await;
    stop_reporter(reporter_stop, reporter).await;
    signals.abort();

    let report = result?;
    log_report(&report);
    Ok(report)
}

/// 停止进度任务并取回最终汇总；任务异常退出时记一条警告。
async fn stop_reporter(
    stop: CancellationToken,
    reporter: JoinHandle<ProgressSummary>,
) -> Option<ProgressSummary> {
    stop.cancel();
    match reporter.await {
        Ok(summary) => Some(summary),
        Err(err) => {
            warn!(target: "aq.progress", error = %err, "progress_reporter_failed");
            None
        }
    }
}

fn log_report(report: &RunReport) {
    for worker in &report.workers {
        info!(
            target: "aq.progress",
            worker = worker.index,
            steps = worker.steps,
            generated = worker.generated,
            committed = worker.committed,
            dropped = worker.dropped,
            batches = worker.batches,
            order_violations = worker.order_violations,
            outcome = worker.outcome.as_str(),
            "worker_summary"
        );
    }
    info!(
        target: "aq.progress",
        generated = report.generated,
        committed = report.committed,
        dropped = report.dropped,
        elapsed_secs = format!("{:.2}", report.elapsed.as_secs_f64()),
        rate = format!("{:.2}", report.rate()),
        interrupted = report.interrupted,
        "run_summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> AppConfig {
        AppConfig {
            database: DatabaseTarget::Params {
                host: "127.0.0.1".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: None,
                database: "air_quality".to_string(),
            },
            pool_size: 4,
            batch_size: 500,
            workers: 4,
            flush_interval_ms: 1500,
            acquire_timeout_ms: 5000,
            acquire_retries: 3,
            acquire_backoff_ms: 250,
            write_retries: 1,
            progress_interval_ms: 1000,
            instance_id: 42,
            ensure_schema: false,
            range_overrides: Vec::new(),
        }
    }

    #[test]
    fn settings_follow_config() {
        let settings = settings_from(&config());
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.max_batch_age, Duration::from_millis(1500));
        assert_eq!(settings.acquire_backoff, Duration::from_millis(250));
        assert_eq!(settings.write_retries, 1);
    }

    #[tokio::test]
    async fn reporter_summary_is_returned_on_stop() {
        let stop = CancellationToken::new();
        let reporter = ProgressReporter::new(Vec::new())
            .spawn(Duration::from_millis(50), stop.clone());
        let summary = stop_reporter(stop, reporter).await.expect("summary");
        assert_eq!(summary.generated, 0);
    }

    #[tokio::test]
    async fn failed_reporter_task_yields_no_summary() {
        let stop = CancellationToken::new();
        let reporter = ProgressReporter::new(Vec::new())
            .spawn(Duration::from_secs(3600), CancellationToken::new());
        reporter.abort();
        assert!(stop_reporter(stop, reporter).await.is_none());
    }

    #[test]
    fn rejects_bad_database_url() {
        let mut config = config();
        config.database = DatabaseTarget::Url("not a url".to_string());
        assert!(connector_from(&config).is_err());
        config.database = DatabaseTarget::Url("postgres://u:p@localhost:5432/aq".to_string());
        assert!(connector_from(&config).is_ok());
    }
}
