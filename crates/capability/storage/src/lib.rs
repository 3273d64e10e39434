//! # 读数存储模块
//!
//! 提供读数持久化的存储抽象与连接池：
//!
//! 1. **接口抽象层** (`traits.rs`)：`Connector` / `StoreConnection`
//! 2. **错误处理层** (`error.rs`)：`StorageError` / `PoolError`
//! 3. **连接参数** (`connection.rs`)：Postgres 连接参数组装
//! 4. **连接池** (`pool.rs`)：有界、超时、惰性校验、租约自动归还
//! 5. **实现层**：
//!    - `postgres/`：sqlx 单连接 + 事务批量写入（生产环境）
//!    - `in_memory/`：内存实现，支持故障注入（测试）
//!
//! ## 事务边界
//!
//! 一次 `write_batch` 就是一个事务：批次内读数要么全部可见，要么全部回滚。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use aq_storage::{ConnectionPool, DbParams, PgConnector};
//! use std::time::Duration;
//!
//! let connector = PgConnector::new(params.to_options());
//! let pool = ConnectionPool::connect(connector, 4, Duration::from_secs(5)).await?;
//! let mut lease = pool.acquire().await?;
//! lease.write_batch(&readings).await?;
//! drop(lease);
//! pool.close().await;
//! ```

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod pool;
pub mod postgres;
pub mod traits;

pub use connection::*;
pub use error::*;
pub use in_memory::{InMemoryConnection, InMemoryConnector, InMemoryReadingStore};
pub use pool::{ConnectionPool, Lease};
pub use postgres::{PgConnector, PgReadingConnection, READINGS_TABLE};
pub use traits::*;
