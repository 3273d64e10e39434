//! 生成写入流水线
//!
//! 时间范围 → `partition` 切分 → 每个分片一个 worker（合成读数、批量写入）
//! → 全部结束后关闭连接池并汇总。

pub mod batch;
pub mod budget;
pub mod error;
pub mod partition;
mod worker;
pub mod worker_pool;

pub use batch::{BatchError, BatchWriter, FlushOutcome, WriteFailure};
pub use budget::RecordBudget;
pub use error::PipelineError;
pub use partition::{
    PartitionError, TimeStepRange, TimeSteps, limit_end, parse_granularity, partition,
    total_steps,
};
pub use worker::{WorkerOutcome, WorkerReport};
pub use worker_pool::{RunReport, RunSettings, WorkerAssignment, WorkerPool};
