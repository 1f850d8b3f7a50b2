use std::net::SocketAddr;

use async_trait::async_trait;
use tern_core::CoreError;

/// 一次读取的结果。
///
/// 以枚举区分“对端正常关闭”“对端重置”与“真正的故障”，接收循环按数据分支而不是按异常分支。
#[derive(Debug)]
pub enum ReadOutcome {
    /// 读取到 `n` 字节，`n > 0`。
    Data(usize),
    /// 对端正常关闭（EOF）。
    Closed,
    /// 对端重置连接；按正常关闭处理。
    Reset,
    /// 其他故障，连接将携带该错误关闭。
    Error(CoreError),
}

/// 面向连接的字节流传输。
///
/// # 契约说明（What）
/// - `read` 与 `write_all` 可由两个任务并发调用：接收任务只读、写出任务只写；
/// - `read` 必须是取消安全的：在挂起点被丢弃时不得丢失已到达的字节；
/// - `shutdown` 为同步、幂等操作；关闭后对端读到 EOF，本端挂起的 `read` 尽快返回。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 读取到 `buf`，`buf` 非空。
    async fn read(&self, buf: &mut [u8]) -> ReadOutcome;

    /// 写出全部字节。
    async fn write_all(&self, buf: &[u8]) -> Result<(), CoreError>;

    /// 关闭双向数据流。
    fn shutdown(&self) -> Result<(), CoreError>;

    /// 对端地址。
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// 本端地址。
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// 传输名称，用于日志与连接的展示形式。
    fn name(&self) -> &'static str;
}

/// 已绑定的监听端，逐个产出入站传输。
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// 等待下一个入站传输。错误会让监听器停止监听。
    async fn accept(&self) -> Result<Box<dyn Transport>, CoreError>;

    /// 实际绑定的地址。
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// 可绑定的监听端点描述。
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// 绑定并开始监听，`backlog` 为挂起连接队列长度。
    async fn bind(&self, backlog: u32) -> Result<Box<dyn Acceptor>, CoreError>;
}
