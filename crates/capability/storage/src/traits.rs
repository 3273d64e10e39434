//! 存储接口 Trait 定义
//!
//! - Connector：建立新的存储连接（连接池补充/替换连接时调用）
//! - StoreConnection：单个连接上的读数批量写入
//!
//! 设计原则：
//! - 一批读数对应一个事务，失败时整体回滚
//! - 连接有效性由连接池在租借时惰性校验
//! - 使用 async_trait 支持异步方法

use crate::error::StorageError;
use async_trait::async_trait;
use domain::Reading;

/// 单个存储连接。
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// 在一个事务内写入整批读数，返回写入行数。
    ///
    /// 返回错误时该批次的任何行都不可见。
    async fn write_batch(&mut self, readings: &[Reading]) -> Result<u64, StorageError>;

    /// 连接是否仍可用。
    async fn is_valid(&mut self) -> bool;

    /// 关闭连接；之后的写入返回错误。
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// 连接工厂。
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: StoreConnection;

    async fn connect(&self) -> Result<Self::Connection, StorageError>;
}
