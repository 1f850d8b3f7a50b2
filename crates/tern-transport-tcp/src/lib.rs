#![doc = r#"
# tern-transport-tcp

## 设计动机（Why）
- 为 `tern-transport` 的 [`Transport`](tern_transport::Transport) /
  [`Endpoint`](tern_transport::Endpoint) 契约提供基于 Tokio 的 TCP 实现，
  让 `ConnectionListener` 与 `Connection` 无需感知套接字细节。

## 核心契约（What）
- [`TcpTransport`]：已建立的 TCP 流；对端重置报告为 `ReadOutcome::Reset`；
- [`TcpEndpoint`]：绑定与接受，`backlog` 来自监听配置；
- [`TcpSocketConfig`]：`SO_LINGER` 与 `TCP_NODELAY`。

## 风险与考量（Trade-offs）
- 错误码前缀 `transport.tcp.*` 与通用 `transport.io` 区分，便于按介质分流告警；
- 未提供 TLS，需要时在更高层包装传输。
"#]

mod error;
mod listener;
mod stream;

pub use listener::TcpEndpoint;
pub use stream::{TcpSocketConfig, TcpTransport};
