//! 进程内传输：以通道模拟字节流，供测试与嵌入式场景使用。
//!
//! # 教案式说明
//! - **意图（Why）**：不依赖真实套接字即可驱动连接状态机，且每次 `write_all`
//!   恰好对应对端的一次“到达”，可以精确复现任意分段方式。
//! - **逻辑（How）**：每个方向一条无界 `mpsc` 通道，元素为数据块或重置标记；
//!   读取一次最多消费一个数据块，剩余部分留到下一次读取。
//! - **契约（What）**：`shutdown` 丢弃发送端，对端读到 EOF；
//!   [`MemoryTransport::inject_reset`] 让对端读到 [`ReadOutcome::Reset`]。

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tern_core::{CoreError, ErrorCategory, codes};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::{Acceptor, Endpoint, ReadOutcome, Transport};

enum Chunk {
    Data(Bytes),
    Reset,
}

struct Incoming {
    rx: mpsc::UnboundedReceiver<Chunk>,
    pending: Bytes,
}

/// 内存管道的一端。
pub struct MemoryTransport {
    incoming: AsyncMutex<Incoming>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Chunk>>>,
    shutdowns: AtomicUsize,
}

impl MemoryTransport {
    /// 创建一对互联的传输。
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::new(right_rx, left_tx), Self::new(left_rx, right_tx))
    }

    fn new(rx: mpsc::UnboundedReceiver<Chunk>, tx: mpsc::UnboundedSender<Chunk>) -> Self {
        Self {
            incoming: AsyncMutex::new(Incoming {
                rx,
                pending: Bytes::new(),
            }),
            outgoing: Mutex::new(Some(tx)),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// 让对端读到重置，随后本端停止发送。
    pub fn inject_reset(&self) {
        if let Some(tx) = self.outgoing.lock().take() {
            let _ = tx.send(Chunk::Reset);
        }
    }

    /// `shutdown` 被调用的次数。
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        let mut incoming = self.incoming.lock().await;
        if incoming.pending.is_empty() {
            match incoming.rx.recv().await {
                Some(Chunk::Data(bytes)) => incoming.pending = bytes,
                Some(Chunk::Reset) => return ReadOutcome::Reset,
                None => return ReadOutcome::Closed,
            }
        }
        let count = buf.len().min(incoming.pending.len());
        buf[..count].copy_from_slice(&incoming.pending[..count]);
        incoming.pending.advance(count);
        ReadOutcome::Data(count)
    }

    async fn write_all(&self, buf: &[u8]) -> Result<(), CoreError> {
        let guard = self.outgoing.lock();
        let tx = guard.as_ref().ok_or_else(|| {
            CoreError::new(codes::TRANSPORT_IO, "memory write: transport is shut down")
                .with_category(ErrorCategory::NonRetryable)
        })?;
        tx.send(Chunk::Data(Bytes::copy_from_slice(buf)))
            .map_err(|_| CoreError::new(codes::TRANSPORT_IO, "memory write: peer is gone"))
    }

    fn shutdown(&self) -> Result<(), CoreError> {
        self.shutdowns.fetch_add(1, Ordering::Relaxed);
        self.outgoing.lock().take();
        Ok(())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

/// `Arc` 包装的传输同样可以交给连接，便于测试保留一份句柄观察调用。
#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        (**self).read(buf).await
    }

    async fn write_all(&self, buf: &[u8]) -> Result<(), CoreError> {
        (**self).write_all(buf).await
    }

    fn shutdown(&self) -> Result<(), CoreError> {
        (**self).shutdown()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        (**self).remote_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        (**self).local_addr()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

enum Pending {
    Transport(MemoryTransport),
    Error(CoreError),
}

/// 进程内监听端点：`bind` 之后可通过 [`connect`](Self::connect) 建立管道。
#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    queue: Arc<Mutex<Option<mpsc::Sender<Pending>>>>,
}

impl MemoryEndpoint {
    /// 创建未绑定的端点。
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接到已绑定的端点，返回客户端一侧。
    pub fn connect(&self) -> Result<MemoryTransport, CoreError> {
        let (client, server) = MemoryTransport::pair();
        self.enqueue(Pending::Transport(server))?;
        Ok(client)
    }

    /// 让监听端的下一次 `accept` 返回给定错误。
    pub fn inject_accept_error(&self, error: CoreError) -> Result<(), CoreError> {
        self.enqueue(Pending::Error(error))
    }

    fn enqueue(&self, pending: Pending) -> Result<(), CoreError> {
        let guard = self.queue.lock();
        let refused =
            || CoreError::new(codes::TRANSPORT_IO, "memory connect: connection refused");
        let tx = guard.as_ref().ok_or_else(refused)?;
        tx.try_send(pending).map_err(|_| refused())
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    async fn bind(&self, backlog: u32) -> Result<Box<dyn Acceptor>, CoreError> {
        let (tx, rx) = mpsc::channel(backlog.max(1) as usize);
        *self.queue.lock() = Some(tx);
        Ok(Box::new(MemoryAcceptor {
            rx: AsyncMutex::new(rx),
        }))
    }
}

struct MemoryAcceptor {
    rx: AsyncMutex<mpsc::Receiver<Pending>>,
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn accept(&self) -> Result<Box<dyn Transport>, CoreError> {
        match self.rx.lock().await.recv().await {
            Some(Pending::Transport(transport)) => Ok(Box::new(transport)),
            Some(Pending::Error(error)) => Err(error),
            None => Err(CoreError::new(
                codes::LISTENER_ACCEPT,
                "memory accept: endpoint closed",
            )),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn each_write_arrives_as_one_chunk() {
        let (client, server) = MemoryTransport::pair();
        client.write_all(b"hello").await.expect("写入失败");
        client.write_all(b"world!").await.expect("写入失败");

        let mut buf = [0u8; 4];
        assert!(matches!(server.read(&mut buf).await, ReadOutcome::Data(4)));
        assert_eq!(&buf, b"hell");
        assert!(matches!(server.read(&mut buf).await, ReadOutcome::Data(1)));
        assert!(matches!(server.read(&mut buf).await, ReadOutcome::Data(4)));
        assert_eq!(&buf, b"worl");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_and_reset_are_distinguishable() {
        let (client, server) = MemoryTransport::pair();
        client.shutdown().expect("关闭失败");
        let mut buf = [0u8; 4];
        assert!(matches!(server.read(&mut buf).await, ReadOutcome::Closed));
        assert!(client.write_all(b"x").await.is_err(), "关闭后写入应失败");

        let (client, server) = MemoryTransport::pair();
        server.inject_reset();
        assert!(matches!(client.read(&mut buf).await, ReadOutcome::Reset));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn endpoint_refuses_before_bind() {
        let endpoint = MemoryEndpoint::new();
        assert!(endpoint.connect().is_err());
        let acceptor = endpoint.bind(4).await.expect("绑定失败");
        let _client = endpoint.connect().expect("绑定后应可连接");
        assert!(acceptor.accept().await.is_ok());
    }
}
