//! 日志安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主进程只需调用一次 [`install`] 即可获得带过滤的结构化日志，
//!   库代码本身只通过 `tracing` 宏发事件，从不擅自安装 Subscriber。
//! - **逻辑（How）**：组装 `registry + EnvFilter + fmt` 三层并设置为全局默认；
//!   `RUST_LOG` 存在时优先，否则采用 [`LoggingConfig::filter`]。
//! - **契约（What）**：重复调用返回 [`TelemetryError::AlreadyInstalled`]；
//!   外部已设置 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

use crate::config::LoggingConfig;

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALLED: OnceLock<String> = OnceLock::new();

/// 日志安装过程可能出现的错误类型。
#[derive(Debug)]
pub enum TelemetryError {
    /// `install` 被重复调用。
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    SubscriberAlreadySet,
    /// 过滤表达式无法解析。
    InvalidFilter(String),
    /// 设置全局 Subscriber 失败的底层错误。
    SetGlobalSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

impl core::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TelemetryError::AlreadyInstalled => f.write_str("日志已完成安装，禁止重复调用 install"),
            TelemetryError::SubscriberAlreadySet => {
                f.write_str("全局 tracing Subscriber 已存在，无法覆盖")
            }
            TelemetryError::InvalidFilter(reason) => write!(f, "日志过滤表达式非法: {reason}"),
            TelemetryError::SetGlobalSubscriber(err) => {
                write!(f, "设置 tracing 全局 Subscriber 失败: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {}

/// 安装全局日志 Subscriber。
pub fn install(config: &LoggingConfig) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let filter = build_env_filter(config)?;
    let directive = filter.to_string();
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(config.ansi));
    tracing::subscriber::set_global_default(subscriber)
        .map_err(TelemetryError::SetGlobalSubscriber)?;

    INSTALLED
        .set(directive)
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

/// 返回已生效的过滤表达式，未安装时为 `None`。
pub fn installed_filter() -> Option<&'static str> {
    INSTALLED.get().map(String::as_str)
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|err| TelemetryError::InvalidFilter(err.to_string())),
    }
}
