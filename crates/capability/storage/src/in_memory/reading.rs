//! 读数内存存储

use crate::error::StorageError;
use crate::traits::{Connector, StoreConnection};
use async_trait::async_trait;
use domain::Reading;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Default)]
struct StoreState {
    rows: RwLock<Vec<Reading>>,
    committed_batches: AtomicUsize,
    failed_batches: AtomicUsize,
    fail_next_writes: AtomicUsize,
    broken_next_checks: AtomicUsize,
    write_delay_ms: AtomicU64,
    connects: AtomicUsize,
    closed: AtomicUsize,
    next_serial: AtomicU64,
    busy: Mutex<HashSet<u64>>,
    active_writes: AtomicUsize,
    max_active_writes: AtomicUsize,
    overlapping_uses: AtomicUsize,
}

/// 共享的内存读数表（克隆后指向同一份数据）。
#[derive(Clone, Default)]
pub struct InMemoryReadingStore {
    state: Arc<StoreState>,
}

impl InMemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            store: self.clone(),
        }
    }

    /// 已提交的全部读数（用于测试）。
    pub fn rows(&self) -> Vec<Reading> {
        self.state.rows.read().map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn committed_batches(&self) -> usize {
        self.state.committed_batches.load(Ordering::SeqCst)
    }

    pub fn failed_batches(&self) -> usize {
        self.state.failed_batches.load(Ordering::SeqCst)
    }

    /// 之后 `count` 次写入在写到一半时失败并回滚。
    pub fn fail_next_writes(&self, count: usize) {
        self.state.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// 之后 `count` 次连接校验返回失效。
    pub fn break_next_checks(&self, count: usize) {
        self.state.broken_next_checks.store(count, Ordering::SeqCst);
    }

    /// 每次写入前等待的时长。
    pub fn set_write_delay(&self, delay: Duration) {
        self.state
            .write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// 累计建立的连接数。
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// 累计关闭的连接数。
    pub fn closed_connections(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// 同时进行写入的最大连接数。
    pub fn max_concurrent_writes(&self) -> usize {
        self.state.max_active_writes.load(Ordering::SeqCst)
    }

    /// 同一连接被并发使用的次数（应始终为 0）。
    pub fn overlapping_uses(&self) -> usize {
        self.state.overlapping_uses.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| value.checked_sub(1))
            .is_ok()
    }

    fn enter(&self, serial: u64) {
        if let Ok(mut busy) = self.state.busy.lock() {
            if !busy.insert(serial) {
                self.state.overlapping_uses.fetch_add(1, Ordering::SeqCst);
            }
        }
        let active = self.state.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_active_writes
            .fetch_max(active, Ordering::SeqCst);
    }

    fn leave(&self, serial: u64) {
        if let Ok(mut busy) = self.state.busy.lock() {
            busy.remove(&serial);
        }
        self.state.active_writes.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 内存连接工厂。
#[derive(Clone)]
pub struct InMemoryConnector {
    store: InMemoryReadingStore,
}

impl InMemoryConnector {
    pub fn store(&self) -> &InMemoryReadingStore {
        &self.store
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, StorageError> {
        self.store.state.connects.fetch_add(1, Ordering::SeqCst);
        let serial = self.store.state.next_serial.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryConnection {
            store: self.store.clone(),
            serial,
            open: true,
        })
    }
}

/// 内存连接。
pub struct InMemoryConnection {
    store: InMemoryReadingStore,
    serial: u64,
    open: bool,
}

impl InMemoryConnection {
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

#[async_trait]
impl StoreConnection for InMemoryConnection {
    async fn write_batch(&mut self, readings: &[Reading]) -> Result<u64, StorageError> {
        if !self.open {
            return Err(StorageError::new("connection closed"));
        }
        if readings.is_empty() {
            return Ok(0);
        }
        self.store.enter(self.serial);
        let delay_ms = self.store.state.write_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        // 先写入事务暂存区，提交时一次性对外可见。
        let mut staged = Vec::with_capacity(readings.len());
        let fail_at = if InMemoryReadingStore::take_fault(&self.store.state.fail_next_writes) {
            Some(readings.len() / 2)
        } else {
            None
        };
        for (index, reading) in readings.iter().enumerate() {
            if fail_at == Some(index) {
                self.store.leave(self.serial);
                self.store.state.failed_batches.fetch_add(1, Ordering::SeqCst);
                return Err(StorageError::new(format!(
                    "injected failure after {index} of {} rows",
                    readings.len()
                )));
            }
            staged.push(reading.clone());
        }

        let result = match self.store.state.rows.write() {
            Ok(mut rows) => {
                rows.extend(staged);
                self.store
                    .state
                    .committed_batches
                    .fetch_add(1, Ordering::SeqCst);
                Ok(readings.len() as u64)
            }
            Err(_) => Err(StorageError::new("lock failed")),
        };
        self.store.leave(self.serial);
        result
    }

    async fn is_valid(&mut self) -> bool {
        self.open && !InMemoryReadingStore::take_fault(&self.store.state.broken_next_checks)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.open {
            self.open = false;
            self.store.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
