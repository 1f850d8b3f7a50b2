#![doc = r#"
# tern-router

## 设计动机（Why）
- 连接只负责把完整报文交出去；本 crate 把报文按操作码交给控制器上的处理函数，
  并在处理前执行校验链。

## 核心契约（What）
- [`Controller`]：业务状态 + 通过 [`HandlerSet`] 显式声明的 `(操作码, 处理函数)`；
- [`PacketValidator`]：处理前的报文检查，可按处理函数、按标签或对整个控制器挂载；
- [`OpcodePacketRouter`]：实现 [`tern_transport::PacketRouter`]，注册全有或全无，
  未知操作码按 [`UnknownOpcodePolicy`] 处置；
- [`RouterError`]：注册、查询与分派错误，可汇流为 `CoreError`。

## 风险与考量（Trade-offs）
- 处理函数签名是同步的；需要等待 IO 的业务应自行派生任务，避免阻塞连接的接收循环。
"#]

mod controller;
mod error;
mod router;

pub use controller::{Controller, HandlerBuilder, HandlerSet, PacketValidator};
pub use error::{RouterError, ValidationError};
pub use router::OpcodePacketRouter;
pub use tern_core::config::UnknownOpcodePolicy;
