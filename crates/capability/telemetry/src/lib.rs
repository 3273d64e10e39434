//! 追踪初始化、运行 ID 与进度汇总。

pub mod progress;

pub use progress::{
    ProgressReporter, ProgressSummary, WorkerProgress, WorkerSnapshot, WorkerState,
};

use tracing_subscriber::{EnvFilter, fmt};

/// 初始化 tracing（默认 info，可通过 RUST_LOG 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成本次运行的 run_id（用于日志关联）。
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
