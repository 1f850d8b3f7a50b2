//! 全局配置模型。
//!
//! # 设计动机（Why）
//! - 缓冲池尺寸、帧上限、监听限额与路由策略需要在部署时调整，
//!   统一收敛到一个可从 TOML 载入的结构，避免散落的常量。
//! - 每个组件同时提供以本节配置为参数的程序化构造函数，配置文件不是必需品。
//!
//! # 契约说明（What）
//! - 所有字段都有默认值，空文档即可得到可用配置；
//! - [`TernConfig::validate`] 拒绝互相矛盾或越界的取值，错误以 [`ConfigError::Invalid`] 返回。

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CoreError, ErrorCategory, codes};

/// 配置载入与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 语法或字段类型错误。
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值非法。
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for CoreError {
    fn from(error: ConfigError) -> Self {
        CoreError::new(codes::CONFIG_INVALID, error.to_string())
            .with_category(ErrorCategory::NonRetryable)
            .with_cause(error)
    }
}

/// tern 全局配置根节点。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TernConfig {
    pub buffers: BuffersConfig,
    pub protocol: ProtocolConfig,
    pub connection: ConnectionConfig,
    pub listener: ListenerConfig,
    pub active_pool: ActivePoolConfig,
    pub router: RouterConfig,
    pub logging: LoggingConfig,
}

impl TernConfig {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件读取并校验配置。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// 校验各节之间的约束。
    ///
    /// # 契约说明（What）
    /// - 缓冲池的分段尺寸与数量必须为正；
    /// - `protocol.max_packet_size` 不得小于 8 字节帧头；
    /// - `listener.max_connections` 为 `-1` 或正数；
    /// - `active_pool.min_connections` 为 `-1` 或正数，`check_period_ms` 为正。
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pool in &self.buffers.pools {
            pool.validate()?;
        }
        self.protocol.validate()?;
        self.listener.validate()?;
        self.active_pool.validate()?;
        Ok(())
    }
}

/// 缓冲池集合配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuffersConfig {
    pub pools: Vec<BufferPoolConfig>,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        // 默认一档小包池与一档满帧池，满帧池尺寸与默认帧上限一致。
        Self {
            pools: vec![
                BufferPoolConfig::new(4 * 1024, 64),
                BufferPoolConfig::new(ProtocolConfig::DEFAULT_MAX_PACKET_SIZE, 16),
            ],
        }
    }
}

/// 单个缓冲池配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferPoolConfig {
    pub segment_size: usize,
    pub segment_count: usize,
    #[serde(default = "default_true")]
    pub allow_expand: bool,
    #[serde(default = "BufferPoolConfig::default_max_try_count")]
    pub max_try_count: usize,
}

impl BufferPoolConfig {
    /// 获取分段时的默认最大重试次数。
    pub const DEFAULT_MAX_TRY_COUNT: usize = 100;

    /// 以默认的扩容与重试参数构造。
    pub fn new(segment_size: usize, segment_count: usize) -> Self {
        Self {
            segment_size,
            segment_count,
            allow_expand: true,
            max_try_count: Self::DEFAULT_MAX_TRY_COUNT,
        }
    }

    /// 设置是否允许扩容。
    pub fn with_allow_expand(mut self, allow_expand: bool) -> Self {
        self.allow_expand = allow_expand;
        self
    }

    fn default_max_try_count() -> usize {
        Self::DEFAULT_MAX_TRY_COUNT
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == 0 {
            return Err(invalid("buffers.pools.segment_size", "must be positive"));
        }
        if self.segment_count == 0 {
            return Err(invalid("buffers.pools.segment_count", "must be positive"));
        }
        Ok(())
    }
}

/// 帧协议配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    pub max_packet_size: usize,
}

impl ProtocolConfig {
    /// 默认帧上限：64 KiB。
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024;

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet_size < 8 {
            return Err(invalid(
                "protocol.max_packet_size",
                "must be at least the 8-byte frame header",
            ));
        }
        if self.max_packet_size > i32::MAX as usize {
            return Err(invalid(
                "protocol.max_packet_size",
                "must fit in the signed 32-bit length field",
            ));
        }
        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_packet_size: Self::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// 连接行为配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// 发送失败时是否仅关闭连接而不向调用方返回错误。
    pub silent_send: bool,
    /// 初始接收缓冲尺寸；缺省时取协议推荐值。
    pub receive_buffer_size: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            silent_send: true,
            receive_buffer_size: None,
        }
    }
}

/// 监听器配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// 并发连接上限，`-1` 表示不限。
    pub max_connections: i64,
    /// 内核等待队列长度。
    pub max_pending_connections: u32,
}

impl ListenerConfig {
    /// 将 `max_connections` 解释为可选上限。
    pub fn connection_limit(&self) -> Option<usize> {
        usize::try_from(self.max_connections).ok()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 || self.max_connections < -1 {
            return Err(invalid(
                "listener.max_connections",
                "must be -1 (unbounded) or a positive number",
            ));
        }
        if self.max_pending_connections == 0 {
            return Err(invalid(
                "listener.max_pending_connections",
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: -1,
            max_pending_connections: 128,
        }
    }
}

/// 主动连接池配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivePoolConfig {
    /// 目标最小连接数，`-1` 表示取可用并行度。
    pub min_connections: i64,
    /// 巡检周期（毫秒）。
    pub check_period_ms: u64,
}

impl ActivePoolConfig {
    /// 解析 `-1` 后的有效最小连接数。
    pub fn effective_min_connections(&self) -> Result<usize, ConfigError> {
        match self.min_connections {
            -1 => Ok(std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)),
            value if value >= 1 => usize::try_from(value).map_err(|_| {
                invalid("active_pool.min_connections", "does not fit in usize")
            }),
            _ => Err(invalid(
                "active_pool.min_connections",
                "must be -1 or at least 1",
            )),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.effective_min_connections()?;
        if self.check_period_ms == 0 {
            return Err(invalid("active_pool.check_period_ms", "must be positive"));
        }
        Ok(())
    }
}

impl Default for ActivePoolConfig {
    fn default() -> Self {
        Self {
            min_connections: -1,
            check_period_ms: 10_000,
        }
    }
}

/// 未知操作码的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownOpcodePolicy {
    /// 返回 `UnknownOpcode` 错误，连接随之关闭。
    #[default]
    Fail,
    /// 静默忽略。
    Ignore,
    /// 记录告警后丢弃，连接保持打开。
    LogAndDrop,
}

/// 路由配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub unknown_opcode: UnknownOpcodePolicy,
}

/// 日志配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法的过滤表达式；`RUST_LOG` 存在时优先。
    pub filter: String,
    /// 是否输出 ANSI 颜色。
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            ansi: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
