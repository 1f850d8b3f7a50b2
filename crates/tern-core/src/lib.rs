#![doc = r#"
# tern-core

## 设计动机（Why）
- **定位**：为 tern 工作区的缓冲、编解码、传输与路由 crate 提供共享的稳定契约，
  避免各层重复定义错误码、配置结构与事件分发规则。
- **架构角色**：位于依赖图最底层，不依赖任何异步运行时，
  上层 crate 通过 `From<DomainError> for CoreError` 汇流到统一错误域。

## 核心契约（What）
- [`CoreError`]：稳定错误码 + 人类可读消息 + 可选根因 + [`ErrorCategory`]；
- [`config::TernConfig`]：从 TOML 载入的全局配置，缺省字段回落到默认值；
- [`telemetry::install`]：一次性安装 `tracing-subscriber`；
- [`observer::Observers`]：有序观察者列表，支持插入序与逆插入序通知。

## 风险与考量（Trade-offs）
- 错误码以 `&'static str` 暴露而非枚举，新增码值无需破坏性升级，
  代价是拼写错误只能在测试中发现。
"#]

pub mod config;
pub mod error;
pub mod observer;
pub mod telemetry;

pub use error::{AggregateError, CoreError, ErrorCategory, ErrorCause, Result, codes};
pub use observer::{ObserverId, Observers};
