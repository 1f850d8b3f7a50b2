#![doc = r#"
# tern-transport

## 设计动机（Why）
- **定位**：把“可插拔的字节流传输”与“报文级连接语义”粘合起来：
  接收循环驱动分帧协议、同步分派报文、单写者队列保证发送顺序、一次性关闭守卫。
- **架构角色**：位于 `tern-codec` 之上、`tern-router` 之下；
  具体传输（TCP、内存管道）只需实现 [`Transport`]、[`Acceptor`] 与 [`Endpoint`]。

## 核心契约（What）
- [`Connection`]：`Idle → Receiving → Closing → Closed` 状态机，`Closed` 事件恰好触发一次；
- [`ConnectionListener`]：接受循环、存活连接跟踪、连接上限与 `disconnect_all`；
- [`ConnectionPool`] / [`ActiveConnectionPool`]：轮询选取与按最小连接数补足；
- [`PacketRouter`]：连接把解出的报文同步交给路由器，[`DispatchError`] 区分“丢弃该报文”与“关闭连接”。

## 实现策略（How）
- 每个连接两个 Tokio 任务：接收任务独占接收缓冲，写出任务独占出站队列；
- 关闭信号通过 `watch` 通道广播，两个任务在下一次挂起点观察到后退出并释放各自持有的缓冲。

## 风险与考量（Trade-offs）
- 分派在接收任务内同步执行，处理器阻塞会直接阻塞该连接的接收；
  需要长耗时处理的业务应自行转交到其他任务。
"#]

mod active;
mod connection;
mod error;
mod listener;
pub mod memory;
mod pool;
mod prioritized;
mod router;
mod transport;
mod virtual_conn;

pub use active::{ActiveConnectionPool, ConnectionRequest};
pub use connection::{
    ClosedObserver, Connection, ConnectionContext, ConnectionId, ConnectionState,
};
pub use error::{ConnectionError, ListenerError, PoolError};
pub use listener::ConnectionListener;
pub use pool::ConnectionPool;
pub use prioritized::PrioritizedConnection;
pub use router::{DispatchError, PacketRouter, Session};
pub use transport::{Acceptor, Endpoint, ReadOutcome, Transport};
pub use virtual_conn::VirtualConnection;
