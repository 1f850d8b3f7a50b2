use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::join_all;
use parking_lot::Mutex;
use tern_core::{CoreError, ObserverId, Observers, config::ListenerConfig};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    Acceptor, Connection, ConnectionContext, ConnectionId, Endpoint, ListenerError, Transport,
    connection::ClosedObserver,
};

type AcceptedObserver = dyn Fn(&Connection) + Send + Sync;
type ErrorObserver = dyn Fn(&CoreError) + Send + Sync;

/// 接受循环与存活连接集合。
///
/// # 设计动机（Why）
/// - 服务端需要一个地方统一回答“现在有哪些连接”“还能再接多少”“如何一次性断开所有连接”；
/// - 监听套接字的生命周期与连接的生命周期相互独立：停止监听不会断开已建立的连接。
///
/// # 契约说明（What）
/// - [`start_listening`](Self::start_listening) 在端点绑定完成后返回；
///   [`stop_listening`](Self::stop_listening) 在接受任务退出、监听端释放后返回；
/// - 连接数达到 `max_connections` 时新接入的传输被立即关闭，从不成为被跟踪的连接；
/// - 接受失败会停止监听并触发 `connection_error` 事件；
/// - [`disconnect_all`](Self::disconnect_all) 在最后一个被跟踪连接的关闭事件完成后返回。
///
/// # 实现策略（How）
/// - 每次开始监听分配一个代次号；接受任务出错时只清理自己代次的状态，
///   避免与并发的 `stop_listening`/`start_listening` 互相覆盖；
/// - 连接关闭观察者只持有监听器的弱引用，连接不会反向延长监听器寿命。
pub struct ConnectionListener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    endpoint: Mutex<Arc<dyn Endpoint>>,
    context: ConnectionContext,
    config: ListenerConfig,
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    accepted: Observers<AcceptedObserver>,
    closed: Observers<ClosedObserver>,
    errors: Observers<ErrorObserver>,
}

struct Running {
    generation: u64,
    local_addr: Option<SocketAddr>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ConnectionListener {
    /// 以端点、连接上下文与监听配置构造，尚未开始监听。
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        context: ConnectionContext,
        config: ListenerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                endpoint: Mutex::new(endpoint),
                context,
                config,
                generation: AtomicU64::new(0),
                running: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                accepted: Observers::new(),
                closed: Observers::new(),
                errors: Observers::new(),
            }),
        }
    }

    /// 替换监听端点；监听中调用返回 [`ListenerError::AlreadyListening`]。
    pub fn set_endpoint(&self, endpoint: Arc<dyn Endpoint>) -> Result<(), ListenerError> {
        let running = self.inner.running.lock();
        if running.is_some() {
            return Err(ListenerError::AlreadyListening);
        }
        *self.inner.endpoint.lock() = endpoint;
        Ok(())
    }

    /// 绑定端点并启动接受任务。
    pub async fn start_listening(&self) -> Result<(), ListenerError> {
        if self.is_listening() {
            return Err(ListenerError::AlreadyListening);
        }
        let endpoint = Arc::clone(&*self.inner.endpoint.lock());
        let acceptor = endpoint
            .bind(self.inner.config.max_pending_connections)
            .await
            .map_err(ListenerError::Bind)?;
        let local_addr = acceptor.local_addr();

        let mut running = self.inner.running.lock();
        if running.is_some() {
            return Err(ListenerError::AlreadyListening);
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            Arc::downgrade(&self.inner),
            acceptor,
            stopped,
            generation,
        ));
        *running = Some(Running {
            generation,
            local_addr,
            stop,
            task,
        });
        info!(?local_addr, "listening started");
        Ok(())
    }

    /// 停止接受新连接；已建立的连接不受影响。
    pub async fn stop_listening(&self) -> Result<(), ListenerError> {
        let running = self
            .inner
            .running
            .lock()
            .take()
            .ok_or(ListenerError::NotListening)?;
        let _ = running.stop.send(());
        if let Err(join) = running.task.await {
            warn!(error = %join, "accept task ended abnormally");
        }
        info!(local_addr = ?running.local_addr, "listening stopped");
        Ok(())
    }

    /// 是否正在监听。
    pub fn is_listening(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    /// 实际绑定的地址；未监听时为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .running
            .lock()
            .as_ref()
            .and_then(|running| running.local_addr)
    }

    /// 被跟踪的存活连接数。
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// 被跟踪连接的快照。
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.connections.lock().values().cloned().collect()
    }

    /// 关闭所有被跟踪的连接，并等待它们的关闭事件全部完成。
    pub async fn disconnect_all(&self) {
        let snapshot = self.connections();
        if snapshot.is_empty() {
            return;
        }
        debug!(count = snapshot.len(), "disconnecting all connections");
        for connection in &snapshot {
            connection.close();
        }
        join_all(snapshot.iter().map(|connection| connection.closed())).await;
    }

    /// 订阅“新连接已接入”事件，投递时连接尚未开始接收。
    pub fn on_connection_accepted(
        &self,
        observer: impl Fn(&Connection) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.accepted.subscribe(Arc::new(observer))
    }

    /// 订阅“被跟踪连接已关闭”事件。
    pub fn on_connection_closed(
        &self,
        observer: impl Fn(&Connection, Option<&CoreError>) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.closed.subscribe(Arc::new(observer))
    }

    /// 订阅监听失败事件。
    pub fn on_connection_error(
        &self,
        observer: impl Fn(&CoreError) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.errors.subscribe(Arc::new(observer))
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        if let Some(running) = self.inner.running.lock().take() {
            let _ = running.stop.send(());
        }
    }
}

async fn accept_loop(
    listener: Weak<ListenerInner>,
    acceptor: Box<dyn Acceptor>,
    mut stopped: oneshot::Receiver<()>,
    generation: u64,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut stopped => break,
            accepted = acceptor.accept() => accepted,
        };
        let Some(inner) = listener.upgrade() else {
            break;
        };
        match accepted {
            Ok(transport) => inner.admit(transport),
            Err(failure) => {
                inner.fail(generation, failure);
                break;
            }
        }
    }
}

impl ListenerInner {
    fn admit(self: &Arc<Self>, transport: Box<dyn Transport>) {
        if let Some(limit) = self.config.connection_limit() {
            if self.connections.lock().len() >= limit {
                warn!(limit, remote = ?transport.remote_addr(), "connection limit reached; dropping accepted transport");
                if let Err(failure) = transport.shutdown() {
                    debug!(error = %failure, "shutdown of rejected transport failed");
                }
                return;
            }
        }

        let connection = match Connection::new(transport, &self.context) {
            Ok(connection) => connection,
            Err(failure) => {
                let failure = CoreError::from(failure);
                error!(error = %failure, "failed to wrap accepted transport");
                self.errors.notify(|observer| observer(&failure));
                return;
            }
        };

        let listener = Arc::downgrade(self);
        let subscription = connection.on_closed(move |connection, failure| {
            if let Some(inner) = listener.upgrade() {
                inner.forget(connection, failure);
            }
        });
        {
            let mut connections = self.connections.lock();
            // 关闭观察者在状态进入 Closing 之后才运行并且需要本锁，锁内检查覆盖订阅前后的关闭。
            if !connection.is_open() {
                drop(connections);
                connection.remove_closed_observer(subscription);
                debug!(connection = %connection, "accepted connection closed before tracking");
                return;
            }
            connections.insert(connection.id(), connection.clone());
        }
        debug!(connection = %connection, "connection accepted");
        self.accepted.notify(|observer| observer(&connection));

        if let Err(failure) = connection.begin_receive() {
            debug!(connection = %connection, error = %failure, "receive loop not started");
        }
    }

    /// 只有确实被跟踪的连接才对外投递关闭事件。
    fn forget(&self, connection: &Connection, failure: Option<&CoreError>) {
        if self.connections.lock().remove(&connection.id()).is_none() {
            return;
        }
        self.closed
            .notify_reverse(|observer| observer(connection, failure));
    }

    fn fail(&self, generation: u64, failure: CoreError) {
        {
            let mut running = self.running.lock();
            if running
                .as_ref()
                .is_some_and(|running| running.generation == generation)
            {
                running.take();
            }
        }
        error!(error = %failure, "accept failed; listening stopped");
        self.errors.notify(|observer| observer(&failure));
    }
}
