//! 存储层错误类型
//!
//! - StorageError：封装底层 SQL / 连接错误
//! - PoolError：连接池租借失败（超时、建连失败、已关闭）

use std::time::Duration;

#[derive(Debug)]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// 连接池错误。
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// 等待空闲连接超时（可重试）。
    #[error("pool exhausted: no connection released within {0:?}")]
    Exhausted(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] StorageError),
    #[error("pool closed")]
    Closed,
}

impl PoolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::Exhausted(_))
    }
}
