use std::{
    io,
    net::{Shutdown, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use socket2::SockRef;
use tern_core::CoreError;
use tern_transport::{ReadOutcome, Transport};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{self, TcpOp};

/// 新建或新接入套接字的选项。
///
/// # 契约说明（What）
/// - `linger = None` 沿用内核默认；`Some(Duration::ZERO)` 使关闭时发送 RST；
/// - `nodelay` 默认打开：报文通常较小，延迟优先于吞吐。
#[derive(Clone, Debug)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
    nodelay: bool,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    /// 默认配置：`linger = None`，`nodelay = true`。
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: true,
        }
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// 设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 当前 `SO_LINGER` 配置。
    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    /// 当前 `TCP_NODELAY` 配置。
    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        SockRef::from(stream).set_linger(self.linger)
    }
}

/// 以 Tokio `TcpStream` 实现的传输。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 连接的接收任务与写出任务并发访问同一套接字；就绪等待加非阻塞读写
///   让两者都只需共享引用，无需拆分流或加互斥锁。
///
/// ## 逻辑 (How)
/// - `read`：等待可读后 `try_read`，`WouldBlock` 视为虚假唤醒继续等待；
/// - `write_all`：等待可写后 `try_write`，直到写完全部字节；
/// - `shutdown`：经 `socket2::SockRef` 同步关闭双向数据流，挂起的读取随即读到 EOF。
///
/// ## 契约 (What)
/// - 对端重置（`ECONNRESET`/`ECONNABORTED`）报告为 [`ReadOutcome::Reset`]；
/// - 其余 IO 错误报告为带稳定错误码的 [`ReadOutcome::Error`]。
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    remote: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

impl TcpTransport {
    /// 主动连接到 `addr`。
    pub async fn connect(addr: SocketAddr, config: &TcpSocketConfig) -> Result<Self, CoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| TcpOp::Connect.fail(err))?;
        config
            .apply(&stream)
            .map_err(|err| TcpOp::Configure.fail(err))?;
        debug!(%addr, "tcp connected");
        Ok(Self::from_stream(stream))
    }

    /// 包装已建立的流。
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        Self {
            stream,
            remote,
            local,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        loop {
            if let Err(err) = self.stream.readable().await {
                return read_failure(err);
            }
            match self.stream.try_read(buf) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(count) => return ReadOutcome::Data(count),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return read_failure(err),
            }
        }
    }

    async fn write_all(&self, buf: &[u8]) -> Result<(), CoreError> {
        let mut written = 0;
        while written < buf.len() {
            self.stream
                .writable()
                .await
                .map_err(|err| TcpOp::Write.fail(err))?;
            match self.stream.try_write(&buf[written..]) {
                Ok(0) => return Err(TcpOp::Write.fail(io::ErrorKind::WriteZero.into())),
                Ok(count) => written += count,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TcpOp::Write.fail(err)),
            }
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), CoreError> {
        match SockRef::from(&self.stream).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TcpOp::Shutdown.fail(err)),
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn name(&self) -> &'static str {
        "Tcp"
    }
}

fn read_failure(err: io::Error) -> ReadOutcome {
    if error::is_reset(&err) {
        ReadOutcome::Reset
    } else {
        ReadOutcome::Error(TcpOp::Read.fail(err))
    }
}
