//! 批量写入器
//!
//! 每个 worker 独占一个 `BatchWriter`。读数先进入缓冲，达到 `batch_size`
//! 或最早一条等待超过 `max_batch_age` 时隐式刷写；刷写租借一个连接，
//! 整批在一个事务中提交，只有成功才清空缓冲。

use aq_storage::{ConnectionPool, Connector, PoolError, StorageError, StoreConnection};
use chrono::NaiveDateTime;
use domain::Reading;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 单批事务写入失败（存储已回滚，批次保留在缓冲中）。
#[derive(Debug, thiserror::Error)]
#[error("batch of {rows} rows failed: {source}")]
pub struct WriteFailure {
    pub rows: usize,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Write(#[from] WriteFailure),
}

/// 一次成功刷写的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub rows: u64,
    /// 本写入器提交的第几个批次（1 起始）。
    pub batch: u64,
    pub elapsed: Duration,
}

pub struct BatchWriter<C: Connector> {
    pool: ConnectionPool<C>,
    worker: usize,
    batch_size: usize,
    max_batch_age: Duration,
    buffer: Vec<Reading>,
    oldest_at: Option<Instant>,
    last_added: Option<NaiveDateTime>,
    last_committed: Option<NaiveDateTime>,
    committed_batches: u64,
    order_violations: u64,
}

impl<C: Connector> BatchWriter<C> {
    pub fn new(
        pool: ConnectionPool<C>,
        worker: usize,
        batch_size: usize,
        max_batch_age: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pool,
            worker,
            batch_size,
            max_batch_age,
            buffer: Vec::with_capacity(batch_size),
            oldest_at: None,
            last_added: None,
            last_committed: None,
            committed_batches: 0,
            order_violations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn committed_batches(&self) -> u64 {
        self.committed_batches
    }

    /// 观察到的时间逆序次数。
    pub fn order_violations(&self) -> u64 {
        self.order_violations
    }

    /// 缓冲中最早的读数已等待超过 `max_batch_age`。
    pub fn flush_due(&self) -> bool {
        self.oldest_at
            .is_some_and(|oldest| oldest.elapsed() >= self.max_batch_age)
    }

    /// 加入一条读数，必要时隐式刷写。
    ///
    /// 刷写失败时读数已在缓冲中，调用方可直接重试 `flush`。
    pub async fn add(&mut self, reading: Reading) -> Result<Option<FlushOutcome>, BatchError> {
        if let Some(previous) = self.last_added {
            if reading.monitor_time < previous {
                self.order_violations += 1;
                warn!(
                    target: "aq.pipeline",
                    worker = self.worker,
                    previous = %previous,
                    current = %reading.monitor_time,
                    "reading_out_of_order"
                );
            }
        }
        self.last_added = Some(reading.monitor_time);
        if self.buffer.is_empty() {
            self.oldest_at = Some(Instant::now());
        }
        self.buffer.push(reading);

        if self.buffer.len() >= self.batch_size || self.flush_due() {
            self.flush().await
        } else {
            Ok(None)
        }
    }

    /// 以一个事务写入整批缓冲；缓冲为空时返回 `Ok(None)`。
    pub async fn flush(&mut self) -> Result<Option<FlushOutcome>, BatchError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.check_batch_order();

        let started = Instant::now();
        let mut lease = self.pool.acquire().await?;
        let result = lease.write_batch(&self.buffer).await;
        drop(lease);

        match result {
            Ok(rows) => {
                self.committed_batches += 1;
                self.last_committed = self.buffer.last().map(|reading| reading.monitor_time);
                self.buffer.clear();
                self.oldest_at = None;
                let outcome = FlushOutcome {
                    rows,
                    batch: self.committed_batches,
                    elapsed: started.elapsed(),
                };
                debug!(
                    target: "aq.pipeline",
                    worker = self.worker,
                    rows,
                    batch = outcome.batch,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "batch_committed"
                );
                Ok(Some(outcome))
            }
            Err(source) => Err(BatchError::Write(WriteFailure {
                rows: self.buffer.len(),
                source,
            })),
        }
    }

    /// 丢弃缓冲，返回丢弃的条数。
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.oldest_at = None;
        dropped
    }

    fn check_batch_order(&mut self) {
        let (Some(previous), Some(first)) = (self.last_committed, self.buffer.first()) else {
            return;
        };
        if first.monitor_time < previous {
            self.order_violations += 1;
            warn!(
                target: "aq.pipeline",
                worker = self.worker,
                previous_batch_end = %previous,
                batch_start = %first.monitor_time,
                "batch_out_of_order"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aq_storage::InMemoryReadingStore;
    use chrono::{NaiveDate, TimeDelta};
    use rust_decimal::Decimal;

    fn reading(id: u64, minute: i64) -> Reading {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("time");
        Reading {
            id,
            device_id: "MN00001".to_string(),
            monitor_time: base + TimeDelta::minutes(minute),
            pm25: Decimal::new(1234, 2),
            pm10: Decimal::new(5678, 2),
            co: Decimal::new(1500, 3),
            no2: Decimal::new(100, 2),
            so2: Decimal::new(200, 2),
            o3: Decimal::new(300, 2),
        }
    }

    async fn writer(
        store: &InMemoryReadingStore,
        batch_size: usize,
    ) -> BatchWriter<aq_storage::InMemoryConnector> {
        let pool = ConnectionPool::connect(store.connector(), 1, Duration::from_millis(100))
            .await
            .expect("pool");
        BatchWriter::new(pool, 0, batch_size, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn flushes_when_batch_is_full() {
        let store = InMemoryReadingStore::new();
        let mut writer = writer(&store, 3).await;

        assert_eq!(writer.add(reading(1, 0)).await.expect("add"), None);
        assert_eq!(writer.add(reading(2, 1)).await.expect("add"), None);
        let outcome = writer.add(reading(3, 2)).await.expect("add").expect("flushed");
        assert_eq!(outcome.rows, 3);
        assert_eq!(outcome.batch, 1);
        assert!(writer.is_empty());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn failed_flush_keeps_batch_for_retry() {
        let store = InMemoryReadingStore::new();
        let mut writer = writer(&store, 10).await;
        for id in 0..4 {
            writer.add(reading(id, id as i64)).await.expect("add");
        }
        store.fail_next_writes(1);

        let err = writer.flush().await.expect_err("injected");
        assert!(matches!(err, BatchError::Write(WriteFailure { rows: 4, .. })));
        assert_eq!(writer.len(), 4);
        assert!(store.is_empty());

        let outcome = writer.flush().await.expect("retry").expect("flushed");
        assert_eq!(outcome.rows, 4);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn flush_is_due_after_max_age() {
        let store = InMemoryReadingStore::new();
        let pool = ConnectionPool::connect(store.connector(), 1, Duration::from_millis(100))
            .await
            .expect("pool");
        let mut writer = BatchWriter::new(pool, 0, 100, Duration::from_millis(20));

        assert!(!writer.flush_due());
        writer.add(reading(1, 0)).await.expect("add");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(writer.flush_due());
        let outcome = writer.add(reading(2, 1)).await.expect("add").expect("forced");
        assert_eq!(outcome.rows, 2);
        assert!(!writer.flush_due());
    }

    #[tokio::test]
    async fn counts_out_of_order_readings() {
        let store = InMemoryReadingStore::new();
        let mut writer = writer(&store, 2).await;
        writer.add(reading(1, 5)).await.expect("add");
        writer.add(reading(2, 6)).await.expect("add");
        writer.add(reading(3, 1)).await.expect("add");
        assert_eq!(writer.order_violations(), 1);
        writer.flush().await.expect("flush");
        // 跨批次在刷写时检查。
        assert_eq!(writer.order_violations(), 2);

        writer.add(reading(4, 2)).await.expect("add");
        assert_eq!(writer.discard(), 1);
        assert!(writer.flush().await.expect("empty").is_none());
    }
}
