//! # PostgreSQL 存储实现
//!
//! - `PgConnector`：按连接参数建立单个 `PgConnection`，并可在启动时建表
//! - `PgReadingConnection`：一批读数一个事务，多行 VALUES 插入
//!
//! 所有 SQL 使用参数绑定；单条 INSERT 按 `MAX_ROWS_PER_STATEMENT` 切分，
//! 避免超出 Postgres 单语句 65535 个绑定参数的上限。

mod reading;

pub use reading::{PgConnector, PgReadingConnection, MAX_ROWS_PER_STATEMENT, READINGS_TABLE};
