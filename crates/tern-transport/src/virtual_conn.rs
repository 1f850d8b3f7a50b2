use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tern_codec::{InboundPacket, OutboundPacket};
use tern_core::{ObserverId, Observers};
use tracing::debug;

use crate::{Connection, ConnectionError, ConnectionId, DispatchError, PacketRouter, Session};

type VirtualClosedObserver = dyn Fn(&VirtualConnection) + Send + Sync;

/// 叠加在真实连接之上的逻辑连接。
///
/// # 契约说明（What）
/// - 发送直接交给基础连接；入站报文由外部经 [`handle_packet`](Self::handle_packet)
///   注入，并用本连接自己的路由器分派，处理器看到的会话是本虚拟连接；
/// - 关闭只影响逻辑连接本身，基础连接保持打开；关闭事件恰好触发一次；
/// - 拥有独立的 [`ConnectionId`]。
#[derive(Clone)]
pub struct VirtualConnection {
    inner: Arc<VirtualInner>,
}

struct VirtualInner {
    id: ConnectionId,
    base: Connection,
    router: Arc<dyn PacketRouter>,
    closed: AtomicBool,
    observers: Observers<VirtualClosedObserver>,
}

impl VirtualConnection {
    /// 以基础连接与逻辑路由器构造。
    pub fn new(base: Connection, router: Arc<dyn PacketRouter>) -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                id: ConnectionId::next(),
                base,
                router,
                closed: AtomicBool::new(false),
                observers: Observers::new(),
            }),
        }
    }

    /// 基础连接。
    pub fn base(&self) -> &Connection {
        &self.inner.base
    }

    /// 逻辑连接标识。
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// 逻辑连接与基础连接都打开时为 `true`。
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.base.is_open()
    }

    /// 以本连接为会话分派一个报文；已关闭时报文被丢弃。
    pub fn handle_packet(&self, packet: InboundPacket<'_>) -> Result<(), DispatchError> {
        if !self.is_open() {
            debug!(id = %self.inner.id, "virtual connection closed; packet dropped");
            return Ok(());
        }
        self.inner.router.handle(self, packet)
    }

    /// 经基础连接发送并等待写出。
    pub async fn send(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.inner.base.send(packet).await
    }

    /// 经基础连接入队发送。
    pub fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        self.inner.base.post(packet)
    }

    /// 关闭逻辑连接；只有第一次调用返回 `true`。
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(id = %self.inner.id, base = %self.inner.base, "virtual connection closed");
        self.inner.observers.notify_reverse(|observer| observer(self));
        self.inner.observers.clear();
        true
    }

    /// 订阅逻辑连接的关闭事件。
    pub fn on_closed(
        &self,
        observer: impl Fn(&VirtualConnection) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.observers.subscribe(Arc::new(observer))
    }
}

impl Session for VirtualConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.base.remote_addr()
    }

    fn is_open(&self) -> bool {
        VirtualConnection::is_open(self)
    }

    fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        VirtualConnection::post(self, packet)
    }

    fn close(&self) {
        VirtualConnection::close(self);
    }
}
