use std::sync::Arc;

use parking_lot::Mutex;
use tern_codec::OutboundPacket;
use tern_core::{ObserverId, Observers};
use tracing::debug;

use crate::{Connection, ConnectionError, PoolError};

type PoolObserver = dyn Fn(&ConnectionPool) + Send + Sync;

/// 轮询选取的动态连接集合。
///
/// # 契约说明（What）
/// - [`request`](Self::request) 以单调前进的游标对池大小取模选取连接；
/// - 连接关闭时自动移出池；
/// - 连接数 0→1 触发 `opened`，1→0 触发 `closed`。
///
/// # 实现策略（How）
/// - 连接列表与游标位于同一把锁下，移除元素时同步修正游标，保证不跳过也不越界；
/// - 池对连接的关闭订阅只持有池的弱引用，观察者在连接移出池时取消订阅。
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    opened: Observers<PoolObserver>,
    closed: Observers<PoolObserver>,
}

#[derive(Default)]
struct PoolState {
    connections: Vec<(Connection, ObserverId)>,
    next_index: usize,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// 创建空池。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                opened: Observers::new(),
                closed: Observers::new(),
            }),
        }
    }

    /// 轮询取出一个连接；池为空时返回 `None`。
    pub fn try_request(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock();
        if state.connections.is_empty() {
            return None;
        }
        if state.next_index >= state.connections.len() {
            state.next_index = 0;
        }
        let index = state.next_index;
        state.next_index += 1;
        Some(state.connections[index].0.clone())
    }

    /// 轮询取出一个连接；池为空时返回 [`PoolError::Empty`]。
    pub fn request(&self) -> Result<Connection, PoolError> {
        self.try_request().ok_or(PoolError::Empty)
    }

    /// 加入连接。已在池中或已关闭的连接不会被加入，返回 `false`。
    pub fn add_connection(&self, connection: Connection) -> bool {
        let pool = Arc::downgrade(&self.inner);
        let subscription = connection.on_closed(move |connection, _| {
            if let Some(inner) = pool.upgrade() {
                ConnectionPool { inner }.remove_connection(connection);
            }
        });

        let became_open = {
            let mut state = self.inner.state.lock();
            // 关闭观察者在状态进入 Closing 之后才运行，锁内检查即可覆盖订阅前后的关闭。
            let rejected = !connection.is_open()
                || state
                    .connections
                    .iter()
                    .any(|(existing, _)| existing == &connection);
            if rejected {
                drop(state);
                connection.remove_closed_observer(subscription);
                return false;
            }
            state.connections.push((connection.clone(), subscription));
            state.connections.len() == 1
        };

        debug!(connection = %connection, "connection added to pool");
        if became_open {
            self.fire(&self.inner.opened);
        }
        true
    }

    /// 移出连接；连接不在池中时返回 `false`。
    pub fn remove_connection(&self, connection: &Connection) -> bool {
        let (subscription, became_empty) = {
            let mut state = self.inner.state.lock();
            let Some(index) = state
                .connections
                .iter()
                .position(|(existing, _)| existing == connection)
            else {
                return false;
            };
            let (_, subscription) = state.connections.remove(index);
            if index < state.next_index {
                state.next_index -= 1;
            }
            if state.next_index >= state.connections.len() {
                state.next_index = 0;
            }
            (subscription, state.connections.is_empty())
        };
        connection.remove_closed_observer(subscription);
        debug!(connection = %connection, "connection removed from pool");
        if became_empty {
            self.fire(&self.inner.closed);
        }
        true
    }

    /// 池中连接数。
    pub fn len(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// 池是否为空。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 池中是否至少有一个连接。
    pub fn is_open(&self) -> bool {
        !self.is_empty()
    }

    /// 池中连接的快照。
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .map(|(connection, _)| connection.clone())
            .collect()
    }

    /// 关闭池中所有连接；连接的关闭事件会逐个把它们移出池。
    pub fn close(&self) {
        for connection in self.connections() {
            connection.close();
        }
    }

    /// 经轮询选出的连接发送并等待写出。
    pub async fn send(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let connection = self.request().map_err(|_| ConnectionError::Closed)?;
        connection.send(packet).await
    }

    /// 经轮询选出的连接入队发送。
    pub fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let connection = self.request().map_err(|_| ConnectionError::Closed)?;
        connection.post(packet)
    }

    /// 订阅连接数 0→1 事件。
    pub fn on_opened(&self, observer: impl Fn(&ConnectionPool) + Send + Sync + 'static) -> ObserverId {
        self.inner.opened.subscribe(Arc::new(observer))
    }

    /// 订阅连接数 1→0 事件。
    pub fn on_closed(&self, observer: impl Fn(&ConnectionPool) + Send + Sync + 'static) -> ObserverId {
        self.inner.closed.subscribe(Arc::new(observer))
    }

    fn fire(&self, observers: &Observers<PoolObserver>) {
        observers.notify(|observer| observer(self));
    }
}
