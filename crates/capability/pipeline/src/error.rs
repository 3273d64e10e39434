//! 流水线错误类型
//!
//! 这里的错误都是致命的：触发中止令牌，整个运行在所有 worker 结束后返回第一个错误。
//! 可恢复的失败（连接池等待超时、单批写入失败）由 worker 内部重试消化。

use crate::partition::PartitionError;
use aq_idgen::IdError;
use aq_storage::PoolError;
use aq_synth::SynthError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),
    #[error("synth config error: {0}")]
    Synth(#[from] SynthError),
    #[error("id generation failed: {0}")]
    Id(#[from] IdError),
    #[error("pool exhausted after {attempts} attempts: {source}")]
    PoolExhausted {
        attempts: u32,
        #[source]
        source: PoolError,
    },
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("worker {index} panicked: {message}")]
    WorkerPanicked { index: usize, message: String },
}
