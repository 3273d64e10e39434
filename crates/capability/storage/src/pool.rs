//! 有界连接池
//!
//! - 容量在构造时固定，由信号量限制同时在外的租约数
//! - `acquire` 最多等待 `acquire_timeout`，超时返回 `PoolError::Exhausted`
//! - 租借时惰性校验连接，失效连接关闭并用新连接替换
//! - `Lease` 被 drop 时归还连接（成功、失败、panic 展开路径均适用）
//! - `close` 等待所有租约归还后才关闭空闲连接

use crate::error::{PoolError, StorageError};
use crate::traits::{Connector, StoreConnection};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct PoolInner<C: Connector> {
    connector: C,
    idle: Mutex<Vec<C::Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
    outstanding: AtomicUsize,
    released: Notify,
    closed: AtomicBool,
}

/// 连接池句柄（克隆开销低，共享同一个池）。
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// 建立连接池并预先打开 `size` 个连接。
    ///
    /// 存储不可达时直接返回错误，便于启动阶段快速失败。
    pub async fn connect(
        connector: C,
        size: usize,
        acquire_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let size = size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            idle.push(connector.connect().await?);
        }
        info!(target: "aq.storage", size, timeout_ms = acquire_timeout.as_millis() as u64, "pool_ready");
        Ok(Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(size)),
                size,
                acquire_timeout,
                outstanding: AtomicUsize::new(0),
                released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.inner.acquire_timeout
    }

    /// 当前在外的租约数。
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// 租借一个连接。
    pub async fn acquire(&self) -> Result<Lease<C>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let permit = match tokio::time::timeout(
            self.inner.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(PoolError::Exhausted(self.inner.acquire_timeout)),
        };

        // 先计入在外租约再复查关闭标记：close 要么等到这份租约归还，要么这里看到关闭。
        // 之后任何提前返回都会 drop 空租约，计数随之回退。
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        let mut lease = Lease {
            connection: None,
            inner: self.inner.clone(),
            _permit: permit,
        };
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let cached = self.take_idle()?;
        let connection = match cached {
            Some(mut connection) => {
                if connection.is_valid().await {
                    connection
                } else {
                    warn!(target: "aq.storage", "pool_connection_broken_replacing");
                    if let Err(err) = connection.close().await {
                        debug!(target: "aq.storage", error = %err, "pool_close_broken_failed");
                    }
                    self.inner.connector.connect().await?
                }
            }
            None => self.inner.connector.connect().await?,
        };
        lease.connection = Some(connection);
        Ok(lease)
    }

    /// 显式归还租约（等价于 drop）。
    pub fn release(&self, lease: Lease<C>) {
        drop(lease);
    }

    /// 等待所有租约归还后关闭空闲连接，返回关闭的连接数。
    ///
    /// 关闭后 `acquire` 返回 `PoolError::Closed`。
    pub async fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        loop {
            let released = self.inner.released.notified();
            if self.outstanding() == 0 {
                break;
            }
            released.await;
        }
        self.inner.permits.close();

        let connections = match self.inner.idle.lock() {
            Ok(mut idle) => std::mem::take(&mut *idle),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let count = connections.len();
        for mut connection in connections {
            if let Err(err) = connection.close().await {
                warn!(target: "aq.storage", error = %err, "pool_connection_close_failed");
            }
        }
        info!(target: "aq.storage", closed = count, "pool_closed");
        count
    }

    fn take_idle(&self) -> Result<Option<C::Connection>, PoolError> {
        let mut idle = self
            .inner
            .idle
            .lock()
            .map_err(|_| PoolError::Connect(StorageError::new("pool lock poisoned")))?;
        Ok(idle.pop())
    }
}

/// 连接租约：独占一个连接，drop 时归还。
pub struct Lease<C: Connector> {
    connection: Option<C::Connection>,
    inner: Arc<PoolInner<C>>,
    // 在 Drop::drop 归还连接之后才释放许可。
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Deref for Lease<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease holds a connection until drop"))
    }
}

impl<C: Connector> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease holds a connection until drop"))
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Ok(mut idle) = self.inner.idle.lock() {
                idle.push(connection);
            }
        }
        self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.inner.released.notify_one();
    }
}
