//! Postgres 读数写入实现

use crate::error::StorageError;
use crate::traits::{Connector, StoreConnection};
use async_trait::async_trait;
use domain::Reading;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, QueryBuilder};
use tracing::{debug, info};

/// 读数表名。
pub const READINGS_TABLE: &str = "air_quality_monitoring";

/// 每行 9 个绑定参数，单条语句最多 7000 行。
pub const MAX_ROWS_PER_STATEMENT: usize = 7000;

const CREATE_TABLE_SQL: &str = "create table if not exists air_quality_monitoring ( \
     id bigint primary key, \
     mn varchar(32) not null, \
     monitor_time timestamp not null, \
     pm25 numeric(10, 2) not null, \
     pm10 numeric(10, 2) not null, \
     co numeric(10, 3) not null, \
     no2 numeric(10, 2) not null, \
     so2 numeric(10, 2) not null, \
     o3 numeric(10, 2) not null, \
     create_time timestamp not null default now(), \
     update_time timestamp not null default now() \
 )";

/// Postgres 连接工厂。
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    /// 确保读数表存在（`create table if not exists`）。
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::query(CREATE_TABLE_SQL).execute(&mut conn).await?;
        conn.close().await?;
        info!(target: "aq.storage", table = READINGS_TABLE, "schema_ensured");
        Ok(())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgReadingConnection;

    async fn connect(&self) -> Result<Self::Connection, StorageError> {
        let conn = PgConnection::connect_with(&self.options).await?;
        Ok(PgReadingConnection { conn: Some(conn) })
    }
}

/// 单个 Postgres 连接。
pub struct PgReadingConnection {
    conn: Option<PgConnection>,
}

#[async_trait]
impl StoreConnection for PgReadingConnection {
    async fn write_batch(&mut self, readings: &[Reading]) -> Result<u64, StorageError> {
        if readings.is_empty() {
            return Ok(0);
        }
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| StorageError::new("connection closed"))?;
        let mut tx = conn.begin().await?;
        let mut written = 0;
        for chunk in readings.chunks(MAX_ROWS_PER_STATEMENT) {
            match insert_readings(&mut *tx, chunk).await {
                Ok(rows) => written += rows,
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        debug!(target: "aq.storage", error = %rollback_err, "rollback_failed");
                    }
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn is_valid(&mut self) -> bool {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

async fn insert_readings(
    conn: &mut PgConnection,
    readings: &[Reading],
) -> Result<u64, StorageError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "insert into air_quality_monitoring \
         (id, mn, monitor_time, pm25, pm10, co, no2, so2, o3, create_time, update_time) ",
    );
    builder.push_values(readings, |mut row, reading| {
        row.push_bind(reading.id as i64)
            .push_bind(reading.device_id.clone())
            .push_bind(reading.monitor_time)
            .push_bind(reading.pm25)
            .push_bind(reading.pm10)
            .push_bind(reading.co)
            .push_bind(reading.no2)
            .push_bind(reading.so2)
            .push_bind(reading.o3)
            .push("now()")
            .push("now()");
    });
    let result = builder.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
