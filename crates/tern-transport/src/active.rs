use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tern_codec::OutboundPacket;
use tern_core::{
    CoreError, ObserverId, Observers, codes,
    config::{ActivePoolConfig, ConfigError},
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, warn};

use crate::{Connection, ConnectionError, ConnectionPool, PoolError};

type Requester = dyn Fn(ConnectionRequest) + Send + Sync;
type CreatedObserver = dyn Fn(&Connection) + Send + Sync;
type ErrorObserver = dyn Fn(&CoreError) + Send + Sync;

/// 按最小连接数自动补足的连接池。
///
/// # 设计动机（Why）
/// - 客户端通常希望“始终保有 N 条到服务端的连接”，但如何建立连接
///   （解析地址、握手、鉴权）属于应用层；池只负责发现缺口并发出请求。
///
/// # 契约说明（What）
/// - [`open`](Self::open) 启动周期任务，首次检查立即执行；
/// - 每次检查按 `min_connections - (池内连接 + 在途请求)` 发出 [`ConnectionRequest`]；
/// - 请求必须以 [`ConnectionRequest::complete`] 或 [`ConnectionRequest::fail`] 了结，
///   未了结即被丢弃会以 `pool.request_unresolved` 触发错误事件；
/// - [`close`](Self::close) 停止周期任务并关闭池内所有连接，此后完成的请求所带连接会被直接关闭。
#[derive(Clone)]
pub struct ActiveConnectionPool {
    inner: Arc<ActiveInner>,
}

struct ActiveInner {
    pool: ConnectionPool,
    min_connections: usize,
    check_period: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    pending: AtomicUsize,
    check_guard: Mutex<()>,
    requester: Mutex<Option<Arc<Requester>>>,
    created: Observers<CreatedObserver>,
    errors: Observers<ErrorObserver>,
}

impl ActiveConnectionPool {
    /// 以最小连接数与检查周期构造，尚未启动。
    pub fn new(min_connections: usize, check_period: Duration) -> Self {
        Self {
            inner: Arc::new(ActiveInner {
                pool: ConnectionPool::new(),
                min_connections,
                check_period,
                timer: Mutex::new(None),
                closed: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                check_guard: Mutex::new(()),
                requester: Mutex::new(None),
                created: Observers::new(),
                errors: Observers::new(),
            }),
        }
    }

    /// 从配置构造；`min_connections = -1` 取可用并行度。
    pub fn from_config(config: &ActivePoolConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.effective_min_connections()?,
            Duration::from_millis(config.check_period_ms),
        ))
    }

    /// 底层的轮询池。
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// 目标最小连接数。
    pub fn min_connections(&self) -> usize {
        self.inner.min_connections
    }

    /// 检查周期。
    pub fn check_period(&self) -> Duration {
        self.inner.check_period
    }

    /// 尚未了结的请求数。
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// 周期任务是否在运行。
    pub fn is_active(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    /// 设置连接请求处理器，替换先前的处理器。
    pub fn on_connection_requested(
        &self,
        requester: impl Fn(ConnectionRequest) + Send + Sync + 'static,
    ) {
        *self.inner.requester.lock() = Some(Arc::new(requester));
    }

    /// 订阅“请求已完成、连接已入池”事件。
    pub fn on_connection_created(
        &self,
        observer: impl Fn(&Connection) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.created.subscribe(Arc::new(observer))
    }

    /// 订阅请求失败与请求未了结事件。
    pub fn on_connection_error(
        &self,
        observer: impl Fn(&CoreError) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.errors.subscribe(Arc::new(observer))
    }

    /// 启动周期补足任务；重复调用无副作用。
    pub fn open(&self) -> Result<(), PoolError> {
        let runtime = Handle::try_current().map_err(|_| PoolError::RuntimeUnavailable)?;
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return Ok(());
        }
        self.inner.closed.store(false, Ordering::Release);
        *timer = Some(runtime.spawn(top_up_loop(
            Arc::downgrade(&self.inner),
            self.inner.check_period,
        )));
        debug!(min_connections = self.inner.min_connections, "active pool opened");
        Ok(())
    }

    /// 执行一次补足检查，返回本次发出的请求数。
    pub fn check_now(&self) -> usize {
        self.inner.check()
    }

    /// 停止周期任务并关闭池内连接。
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
        self.inner.pool.close();
        debug!("active pool closed");
    }

    /// 轮询取出一个连接。
    pub fn request(&self) -> Result<Connection, PoolError> {
        self.inner.pool.request()
    }

    /// 经轮询选出的连接发送并等待写出。
    pub async fn send(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        self.inner.pool.send(packet).await
    }

    /// 经轮询选出的连接入队发送。
    pub fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        self.inner.pool.post(packet)
    }
}

async fn top_up_loop(pool: Weak<ActiveInner>, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        inner.check();
    }
}

impl ActiveInner {
    fn check(self: &Arc<Self>) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let Some(requester) = self.requester.lock().clone() else {
            warn!("active pool has no connection requester; skipping top-up");
            return 0;
        };

        let deficit = {
            let _guard = self.check_guard.lock();
            let present = self.pool.len() + self.pending.load(Ordering::Acquire);
            let deficit = self.min_connections.saturating_sub(present);
            self.pending.fetch_add(deficit, Ordering::AcqRel);
            deficit
        };
        if deficit > 0 {
            debug!(deficit, "requesting connections");
        }
        for _ in 0..deficit {
            requester(ConnectionRequest {
                pool: Arc::downgrade(self),
                resolved: false,
            });
        }
        deficit
    }

    fn settle_one(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            });
    }

    fn report(&self, failure: &CoreError) {
        self.errors.notify(|observer| observer(failure));
    }
}

/// 一次“请建立一条新连接”的请求。
///
/// 必须且只能以 [`complete`](Self::complete) 或 [`fail`](Self::fail) 了结；
/// 两者都会消耗请求，编译期即排除重复了结。
#[must_use = "a connection request must be completed or failed"]
pub struct ConnectionRequest {
    pool: Weak<ActiveInner>,
    resolved: bool,
}

impl ConnectionRequest {
    /// 以新建的连接了结请求，连接加入池并触发 `connection_created`。
    pub fn complete(mut self, connection: Connection) {
        self.resolved = true;
        let Some(inner) = self.pool.upgrade() else {
            connection.close();
            return;
        };
        inner.settle_one();
        if inner.closed.load(Ordering::Acquire) {
            debug!(connection = %connection, "active pool closed; discarding completed connection");
            connection.close();
            return;
        }
        if inner.pool.add_connection(connection.clone()) {
            inner.created.notify(|observer| observer(&connection));
        }
    }

    /// 以失败了结请求，触发 `connection_error`。
    pub fn fail(mut self, failure: CoreError) {
        self.resolved = true;
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        inner.settle_one();
        warn!(error = %failure, "connection request failed");
        let failure = CoreError::new(codes::POOL_REQUEST_FAILED, "connection request failed")
            .with_cause(failure);
        inner.report(&failure);
    }
}

impl Drop for ConnectionRequest {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        inner.settle_one();
        error!("connection request dropped without being completed or failed");
        let failure = CoreError::new(
            codes::POOL_REQUEST_UNRESOLVED,
            "The connection request was not completed correctly.",
        );
        inner.report(&failure);
    }
}
