//! 报文级连接：把一个 [`Transport`] 包装为带状态机、接收循环与单写者队列的会话。
//!
//! # 教案式说明
//! - **意图（Why）**：传输只懂字节流；连接负责分帧、按序分派、按序写出，
//!   并保证无论多少方同时触发关闭，`Closed` 事件都只触发一次。
//! - **逻辑（How）**：
//!   - 状态保存在 `watch` 通道中，所有迁移都经由 `send_if_modified` 的单次比较完成；
//!   - 接收任务与写出任务各自订阅状态，观察到 `Closing` 即退出并释放持有的缓冲；
//!   - 出站报文先在调用方线程编码到池化分段，再进入无界队列交给写出任务。
//! - **契约（What）**：
//!   - `Idle → Receiving → Closing → Closed`，`Closed` 为终态；
//!   - 关闭观察者按逆订阅序投递，投递完成后状态才变为 `Closed`，
//!     因此 [`Connection::closed`] 返回时所有观察者都已运行完毕。

mod receive;
mod send;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tern_buffer::BufferPoolManager;
use tern_codec::{OutboundPacket, Protocol};
use tern_core::{AggregateError, CoreError, ObserverId, Observers, config::ConnectionConfig};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, warn};

use crate::{ConnectionError, PacketRouter, Session, Transport};

use self::send::OutboundFrame;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的连接标识，展示为 `#n`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// 分配一个新的标识；自定义 [`Session`] 实现也可借此获得不与连接冲突的编号。
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 数值形式。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 连接状态；变体按生命周期先后排序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// 已建立，尚未开始接收。
    Idle,
    /// 接收循环运行中。
    Receiving,
    /// 关闭进行中，观察者正在收到通知。
    Closing,
    /// 终态。
    Closed,
}

/// 关闭观察者：收到连接自身与触发关闭的错误（对端正常关闭时为 `None`）。
pub type ClosedObserver = dyn Fn(&Connection, Option<&CoreError>) + Send + Sync;

/// 构造连接所需的共享协作者。
///
/// 同一监听器或连接池下的连接共享一份上下文，克隆只增加引用计数。
#[derive(Clone)]
pub struct ConnectionContext {
    protocol: Arc<dyn Protocol>,
    router: Arc<dyn PacketRouter>,
    buffers: BufferPoolManager,
    config: ConnectionConfig,
}

impl ConnectionContext {
    /// 以默认连接配置构造上下文。
    pub fn new(
        protocol: Arc<dyn Protocol>,
        router: Arc<dyn PacketRouter>,
        buffers: BufferPoolManager,
    ) -> Self {
        Self {
            protocol,
            router,
            buffers,
            config: ConnectionConfig::default(),
        }
    }

    /// 替换连接配置。
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// 分帧协议。
    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    /// 报文路由器。
    pub fn router(&self) -> &Arc<dyn PacketRouter> {
        &self.router
    }

    /// 缓冲池管理器。
    pub fn buffers(&self) -> &BufferPoolManager {
        &self.buffers
    }

    /// 连接配置。
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("max_packet_size", &self.protocol.max_packet_size())
            .field("buffers", &self.buffers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// 报文级连接句柄。克隆得到指向同一连接的新句柄。
///
/// # 契约说明（What）
/// - 构造时即启动写出任务，因此必须在 Tokio 运行时内调用 [`Connection::new`]；
/// - [`begin_receive`](Self::begin_receive) 只能成功一次；
/// - [`send`](Self::send) 与 [`post`](Self::post) 共用一条出站队列，同一调用方的提交顺序即写出顺序；
/// - 相等性按句柄指向的连接判定。
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    name: &'static str,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
    transport: Arc<dyn Transport>,
    context: ConnectionContext,
    runtime: Handle,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    close_error: OnceLock<Arc<CoreError>>,
    closed_observers: Observers<ClosedObserver>,
}

impl Connection {
    /// 包装传输并启动写出任务。
    ///
    /// # 错误
    /// - 当前线程不在 Tokio 运行时内时返回 [`ConnectionError::RuntimeUnavailable`]。
    pub fn new(
        transport: Box<dyn Transport>,
        context: &ConnectionContext,
    ) -> Result<Self, ConnectionError> {
        let runtime = Handle::try_current().map_err(|_| ConnectionError::RuntimeUnavailable)?;
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (outbound, queue) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            id: ConnectionId::next(),
            name: transport.name(),
            remote: transport.remote_addr(),
            local: transport.local_addr(),
            transport: Arc::clone(&transport),
            context: context.clone(),
            runtime,
            state,
            outbound,
            close_error: OnceLock::new(),
            closed_observers: Observers::new(),
        });

        let closing = inner.state.subscribe();
        inner.runtime.spawn(send::write_loop(
            Arc::downgrade(&inner),
            transport,
            closing,
            queue,
        ));
        let connection = Connection { inner };
        debug!(connection = %connection, id = %connection.id(), "connection created");
        Ok(connection)
    }

    /// 连接标识。
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// 对端地址。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote
    }

    /// 本端地址。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local
    }

    /// 底层传输名称。
    pub fn transport_name(&self) -> &'static str {
        self.inner.name
    }

    /// 连接上下文。
    pub fn context(&self) -> &ConnectionContext {
        &self.inner.context
    }

    /// 当前状态。
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// 是否尚未进入关闭流程。
    pub fn is_open(&self) -> bool {
        self.state() < ConnectionState::Closing
    }

    /// 触发关闭的错误；正常关闭或尚未关闭时为 `None`。
    pub fn close_error(&self) -> Option<Arc<CoreError>> {
        self.inner.close_error.get().cloned()
    }

    /// 开始接收。
    ///
    /// # 执行逻辑（How）
    /// 1. 以单次比较把 `Idle` 迁移为 `Receiving`；
    /// 2. 从池中租借接收缓冲，尺寸取配置值或协议推荐值；
    /// 3. 启动接收任务。缓冲租借失败时连接携带该错误关闭。
    pub fn begin_receive(&self) -> Result<(), ConnectionError> {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Receiving;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(match self.state() {
                ConnectionState::Receiving => ConnectionError::AlreadyReceiving,
                _ => ConnectionError::Closed,
            });
        }

        let context = &self.inner.context;
        let size = context
            .config
            .receive_buffer_size
            .unwrap_or_else(|| context.protocol.recommended_buffer_size());
        let buffer = match context.buffers.acquire_at_least(size) {
            Ok(buffer) => buffer,
            Err(error) => {
                let core = CoreError::from(error.clone());
                self.inner.close(Some(core));
                return Err(ConnectionError::Buffer(error));
            }
        };
        debug!(connection = %self, buffer = buffer.len(), "receive loop started");
        self.inner
            .runtime
            .spawn(receive::receive_loop(self.clone(), buffer));
        Ok(())
    }

    /// 编码并写出报文，等待写出完成。
    ///
    /// 任何发送失败都会携带该错误关闭连接；`silent_send` 只决定调用方是否看到错误，
    /// 打开时返回 `Ok(())`。
    pub async fn send(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let (reply, done) = oneshot::channel();
        let outcome = match self.enqueue(packet, Some(reply)) {
            Ok(()) => match done.await {
                Ok(written) => written.map_err(ConnectionError::Transport),
                Err(_) => Err(ConnectionError::Closed),
            },
            Err(error) => Err(error),
        };
        self.settle(outcome)
    }

    /// 编码并入队报文，不等待写出完成。
    pub fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let outcome = self.enqueue(packet, None);
        self.settle(outcome)
    }

    /// 无错误地关闭连接；只有第一次调用返回 `true`。
    pub fn close(&self) -> bool {
        self.inner.close(None)
    }

    /// 携带错误关闭连接；只有第一次调用返回 `true`，后续调用的错误被丢弃。
    pub fn close_with_error(&self, error: CoreError) -> bool {
        self.inner.close(Some(error))
    }

    /// 等待连接进入 `Closed`。已关闭时立即返回。
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// 订阅关闭事件。连接已关闭时观察者不会再被调用。
    pub fn on_closed(
        &self,
        observer: impl Fn(&Connection, Option<&CoreError>) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.closed_observers.subscribe(Arc::new(observer))
    }

    /// 取消关闭事件订阅。
    pub fn remove_closed_observer(&self, id: ObserverId) -> bool {
        self.inner.closed_observers.unsubscribe(id)
    }

    /// 两个句柄是否指向同一连接。
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn enqueue(
        &self,
        packet: OutboundPacket,
        reply: Option<oneshot::Sender<Result<(), CoreError>>>,
    ) -> Result<(), ConnectionError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed);
        }
        // 编码或租借失败后报文已无法送达，连接随之关闭，静默模式也不例外。
        let mut frame = match send::encode(&self.inner.context, &packet) {
            Ok(frame) => frame,
            Err(error) => {
                self.inner.close(Some(error.to_core()));
                return Err(error);
            }
        };
        frame.reply = reply;
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| ConnectionError::Closed)
    }

    fn settle(&self, outcome: Result<(), ConnectionError>) -> Result<(), ConnectionError> {
        match outcome {
            Err(error) if self.inner.context.config.silent_send => {
                debug!(connection = %self, error = %error, "send failed silently");
                Ok(())
            }
            other => other,
        }
    }
}

impl ConnectionInner {
    /// 一次性关闭守卫。
    ///
    /// # 执行逻辑（How）
    /// 1. 以单次比较把状态推进到 `Closing`，失败者直接返回；
    /// 2. 关闭传输，把触发错误与关闭错误折叠为一个；
    /// 3. 逆订阅序通知观察者并清空列表，最后进入 `Closed`。
    pub(crate) fn close(self: &Arc<Self>, cause: Option<CoreError>) -> bool {
        let won = self.state.send_if_modified(|state| {
            if *state < ConnectionState::Closing {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        });
        if !won {
            return false;
        }

        let mut errors: Vec<CoreError> = cause.into_iter().collect();
        if let Err(error) = self.transport.shutdown() {
            errors.push(error);
        }
        let error = AggregateError::fold(errors).map(Arc::new);

        let connection = Connection {
            inner: Arc::clone(self),
        };
        match &error {
            Some(error) => {
                let _ = self.close_error.set(Arc::clone(error));
                warn!(connection = %connection, error = %error, "connection closed with error");
            }
            None => debug!(connection = %connection, "connection closed"),
        }

        self.closed_observers
            .notify_reverse(|observer| observer(&connection, error.as_deref()));
        self.closed_observers.clear();
        self.state.send_replace(ConnectionState::Closed);
        true
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Connection {}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.remote {
            Some(remote) => write!(f, "{}({})", self.inner.name, remote),
            None => write!(f, "{}({})", self.inner.name, self.inner.id),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.name)
            .field("remote", &self.inner.remote)
            .field("state", &self.state())
            .finish()
    }
}

impl Session for Connection {
    fn id(&self) -> ConnectionId {
        Connection::id(self)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Connection::remote_addr(self)
    }

    fn is_open(&self) -> bool {
        Connection::is_open(self)
    }

    fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        Connection::post(self, packet)
    }

    fn close(&self) {
        Connection::close(self);
    }
}
