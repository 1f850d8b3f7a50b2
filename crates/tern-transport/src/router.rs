use std::net::SocketAddr;

use tern_codec::{InboundPacket, OutboundPacket};
use tern_core::CoreError;
use thiserror::Error;

use crate::{ConnectionError, ConnectionId};

/// 处理器可见的会话视图：报文来自哪里、如何回包、如何断开。
///
/// [`Connection`](crate::Connection) 与 [`VirtualConnection`](crate::VirtualConnection) 都实现该 trait，
/// 路由器因此不关心报文来自真实传输还是逻辑子连接。
pub trait Session: Send + Sync {
    /// 进程内唯一标识。
    fn id(&self) -> ConnectionId;

    /// 对端地址。
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// 是否仍然打开。
    fn is_open(&self) -> bool;

    /// 入队一个出站报文，不等待写出完成。
    fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError>;

    /// 关闭会话。
    fn close(&self);
}

/// 报文分派失败时对连接的处置。
#[derive(Debug, Error)]
pub enum DispatchError {
    /// 只丢弃当前报文，连接继续接收后续报文。
    #[error("packet rejected: {0}")]
    Rejected(CoreError),
    /// 连接携带该错误关闭。
    #[error("fatal dispatch failure: {0}")]
    Fatal(CoreError),
}

impl DispatchError {
    /// 内部的核心错误。
    pub fn error(&self) -> &CoreError {
        match self {
            DispatchError::Rejected(error) | DispatchError::Fatal(error) => error,
        }
    }
}

/// 把解出的报文交给业务处理器。
///
/// # 契约说明（What）
/// - 同一会话的报文按到达顺序逐个调用，不会并发；
/// - 调用在接收任务内同步执行，实现不得长时间阻塞；
/// - `packet` 的负载借用接收缓冲，调用返回后失效。
pub trait PacketRouter: Send + Sync + 'static {
    /// 分派一个报文。
    fn handle(&self, session: &dyn Session, packet: InboundPacket<'_>) -> Result<(), DispatchError>;
}

impl<F> PacketRouter for F
where
    F: Fn(&dyn Session, InboundPacket<'_>) -> Result<(), DispatchError> + Send + Sync + 'static,
{
    fn handle(&self, session: &dyn Session, packet: InboundPacket<'_>) -> Result<(), DispatchError> {
        self(session, packet)
    }
}
