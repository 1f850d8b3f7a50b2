use std::net::SocketAddr;

use async_trait::async_trait;
use tern_core::CoreError;
use tern_transport::{Acceptor, Endpoint, Transport};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, warn};

use crate::{
    TcpSocketConfig, TcpTransport,
    error::TcpOp,
};

/// 可绑定的 TCP 监听端点。
///
/// # 契约 (What)
/// - `bind` 在绑定前打开 `SO_REUSEADDR`，以 `backlog` 作为内核等待队列长度；
/// - 绑定端口 0 时，实际端口可从返回的 [`Acceptor::local_addr`] 读取；
/// - 接入的流按 [`TcpSocketConfig`] 配置；配置失败只记录告警，不拒绝连接。
#[derive(Clone, Debug)]
pub struct TcpEndpoint {
    addr: SocketAddr,
    config: TcpSocketConfig,
}

impl TcpEndpoint {
    /// 以默认套接字配置描述端点。
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_config(addr, TcpSocketConfig::default())
    }

    /// 指定接入流的套接字配置。
    pub fn with_config(addr: SocketAddr, config: TcpSocketConfig) -> Self {
        Self { addr, config }
    }

    /// 配置的监听地址。
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// 接入流的套接字配置。
    pub fn socket_config(&self) -> &TcpSocketConfig {
        &self.config
    }

    fn listen(&self, backlog: u32) -> std::io::Result<TcpListener> {
        let socket = if self.addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(self.addr)?;
        socket.listen(backlog)
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    async fn bind(&self, backlog: u32) -> Result<Box<dyn Acceptor>, CoreError> {
        let listener = self
            .listen(backlog)
            .map_err(|err| TcpOp::Bind.fail(err))?;
        let local = listener
            .local_addr()
            .map_err(|err| TcpOp::Bind.fail(err))?;
        debug!(%local, backlog, "tcp listener bound");
        Ok(Box::new(TcpAcceptor {
            listener,
            local,
            config: self.config.clone(),
        }))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    local: SocketAddr,
    config: TcpSocketConfig,
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<Box<dyn Transport>, CoreError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|err| TcpOp::Accept.fail(err))?;
        if let Err(err) = self.config.apply(&stream) {
            warn!(%peer, error = %err, "failed to configure accepted tcp stream");
        }
        Ok(Box::new(TcpTransport::from_stream(stream)))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }
}
