//! # 内存存储实现
//!
//! 用于单元测试、集成测试和无数据库演示：
//! - 提交语义与 Postgres 一致：整批可见或整批不可见
//! - 支持故障注入（写入失败、连接失效、写入延迟）
//! - 记录并发写入情况，便于验证连接独占

mod reading;

pub use reading::{InMemoryConnection, InMemoryConnector, InMemoryReadingStore};
