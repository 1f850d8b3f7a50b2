use std::{borrow::Cow, error::Error, fmt};

/// `CoreError` 表示 tern 各 crate 共享的稳定错误域，是所有可观察错误的最终形态。
///
/// # 设计背景（Why）
/// - 缓冲池、帧协议、连接与路由在不同层次产生的故障需要合流为统一的错误码，
///   以便日志与关闭事件能够按码值做精确分流。
/// - 各 crate 自身仍使用 `thiserror` 枚举表达细粒度失败，再通过 `From` 转换到此处。
///
/// # 逻辑解析（How）
/// - 以 Builder 风格方法叠加底层原因与分类；`source()` 暴露完整链路。
/// - 错误码 `code` 始终为 `'static` 字符串，承载稳定语义；`message` 面向排障人员。
///
/// # 契约说明（What）
/// - **前置条件**：调用方应使用 [`codes`] 模块中的常量，或遵循 `<域>.<语义>` 约定。
/// - **后置条件**：返回值拥有独立所有权，满足 `Send + Sync + 'static`，可在任务间移动。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以方便跨任务传递。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// 工作区统一的返回值别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

impl CoreError {
    /// 构造核心错误。
    ///
    /// # 示例（Examples）
    /// ```rust
    /// use tern_core::{CoreError, codes};
    ///
    /// let err = CoreError::new(codes::POOL_EMPTY, "connection pool is empty");
    /// assert_eq!(err.code(), codes::POOL_EMPTY);
    /// assert_eq!(err.to_string(), "[pool.empty] connection pool is empty");
    /// ```
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为现有错误设置底层原因。
    pub fn set_cause(&mut self, cause: impl Error + Send + Sync + 'static) {
        self.cause = Some(Box::new(cause));
    }

    /// 显式标记错误分类，覆盖按错误码推导的默认值。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类。
    ///
    /// # 执行逻辑（How）
    /// 1. 优先返回显式设置的分类；
    /// 2. 否则按错误码查表（见内部函数 `default_category`）；
    /// 3. 查表失败时回退为 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .or_else(|| default_category(self.code))
            .unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 复制码值、消息与分类，不复制根因。
    ///
    /// 用于同一失败需要同时交给关闭事件与调用方的场景。
    pub fn duplicate(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            cause: None,
            category: Some(self.category()),
        }
    }

    /// 若底层原因是 [`AggregateError`]，返回其成员列表。
    pub fn aggregated(&self) -> Option<&[CoreError]> {
        self.cause
            .as_ref()
            .and_then(|cause| cause.downcast_ref::<AggregateError>())
            .map(AggregateError::errors)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误分类枚举，驱动连接关闭与调用方重试策略。
///
/// # 契约说明（What）
/// - `Retryable`：调用方稍后重试可能成功（例如对端重置后重连）；
/// - `ResourceExhausted`：缓冲或连接资源耗尽，调用方应施加背压或丢弃工作；
/// - `ProtocolViolation`：帧格式错误，对当前连接是致命的；
/// - `Cancelled`/`Timeout`：由关闭或停止监听触发的中止。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    ResourceExhausted,
    ProtocolViolation,
    Cancelled,
    Timeout,
}

/// 关闭过程中多个相互独立的失败的聚合容器。
///
/// # 设计背景（Why）
/// - 连接拆除可能同时遇到“触发关闭的错误”与“关闭底层句柄时的错误”，
///   丢弃任一都会让排障缺失关键线索。
///
/// # 契约说明（What）
/// - 至少包含一个成员；`Display` 以 `; ` 拼接所有成员。
/// - 作为 [`CoreError`] 的 `cause` 出现时，可通过 [`CoreError::aggregated`] 取回。
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<CoreError>,
}

impl AggregateError {
    /// 以成员列表构造聚合错误。
    pub fn new(errors: Vec<CoreError>) -> Self {
        Self { errors }
    }

    /// 返回全部成员。
    pub fn errors(&self) -> &[CoreError] {
        &self.errors
    }

    /// 消耗结构并返回成员列表。
    pub fn into_errors(self) -> Vec<CoreError> {
        self.errors
    }

    /// 将多个错误折叠为单个 [`CoreError`]。
    ///
    /// - 空列表返回 `None`；
    /// - 单个错误原样返回；
    /// - 多个错误包装为 `connection.teardown`，cause 为本聚合体。
    pub fn fold(mut errors: Vec<CoreError>) -> Option<CoreError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            count => Some(
                CoreError::new(
                    codes::CONNECTION_TEARDOWN,
                    format!("{count} errors occurred while closing"),
                )
                .with_cause(AggregateError::new(errors)),
            ),
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            fmt::Display::fmt(error, f)?;
        }
        Ok(())
    }
}

impl Error for AggregateError {}

/// 工作区内置的错误码常量集合，确保日志与关闭事件具有稳定识别符。
///
/// 错误码遵循 `<领域>.<语义>` 命名约定，方便在跨组件日志中检索与聚合。
pub mod codes {
    /// 缓冲池在重试上限内未能取得分段。
    pub const BUFFER_EXHAUSTED: &str = "buffer.exhausted";
    /// 请求的最小尺寸超过池的分段尺寸。
    pub const BUFFER_TOO_SMALL: &str = "buffer.too_small";
    /// 池管理器中没有满足尺寸的池。
    pub const BUFFER_NO_SUITABLE_POOL: &str = "buffer.no_suitable_pool";
    /// 归还的分段不属于该池。
    pub const BUFFER_FOREIGN_SEGMENT: &str = "buffer.foreign_segment";
    /// 分段区间越界。
    pub const BUFFER_INVALID_RANGE: &str = "buffer.invalid_range";
    /// 池已关闭。
    pub const BUFFER_POOL_CLOSED: &str = "buffer.pool_closed";
    /// 池构造参数非法。
    pub const BUFFER_INVALID_CONFIG: &str = "buffer.invalid_config";
    /// 帧长度字段超出合法区间。
    pub const PROTOCOL_INVALID_FRAME_SIZE: &str = "protocol.invalid_frame_size";
    /// 待写出的帧超过上限或目标缓冲。
    pub const PROTOCOL_PACKET_TOO_LARGE: &str = "protocol.packet_too_large";
    /// 报文未携带操作码。
    pub const PROTOCOL_MISSING_OPCODE: &str = "protocol.missing_opcode";
    /// 报文读写越界。
    pub const PROTOCOL_MALFORMED: &str = "protocol.malformed";
    /// 传输层 I/O 错误。
    pub const TRANSPORT_IO: &str = "transport.io";
    /// 对端重置连接。
    pub const TRANSPORT_RESET: &str = "transport.reset";
    /// 连接已处于接收状态。
    pub const CONNECTION_ALREADY_RECEIVING: &str = "connection.already_receiving";
    /// 连接已关闭。
    pub const CONNECTION_CLOSED: &str = "connection.closed";
    /// 关闭过程中出现多个错误。
    pub const CONNECTION_TEARDOWN: &str = "connection.teardown";
    /// 连接池为空。
    pub const POOL_EMPTY: &str = "pool.empty";
    /// 连接请求未被完成或失败即被丢弃。
    pub const POOL_REQUEST_UNRESOLVED: &str = "pool.request_unresolved";
    /// 连接请求以失败告终。
    pub const POOL_REQUEST_FAILED: &str = "pool.request_failed";
    /// 监听器已在监听。
    pub const LISTENER_ALREADY_LISTENING: &str = "listener.already_listening";
    /// 监听器未在监听。
    pub const LISTENER_NOT_LISTENING: &str = "listener.not_listening";
    /// 接受连接失败。
    pub const LISTENER_ACCEPT: &str = "listener.accept";
    /// 同一控制器类型重复注册。
    pub const ROUTER_DUPLICATE_CONTROLLER: &str = "router.duplicate_controller";
    /// 操作码重复注册。
    pub const ROUTER_DUPLICATE_OPCODE: &str = "router.duplicate_opcode";
    /// 未注册的操作码。
    pub const ROUTER_UNKNOWN_OPCODE: &str = "router.unknown_opcode";
    /// 报文校验失败。
    pub const ROUTER_VALIDATION_FAILED: &str = "router.validation_failed";
    /// 控制器未注册。
    pub const ROUTER_CONTROLLER_NOT_FOUND: &str = "router.controller_not_found";
    /// 处理函数返回错误。
    pub const ROUTER_HANDLER_FAILED: &str = "router.handler_failed";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
    /// 当前线程不在 Tokio 运行时内，无法派生后台任务。
    pub const RUNTIME_UNAVAILABLE: &str = "runtime.unavailable";
}

fn default_category(code: &str) -> Option<ErrorCategory> {
    let category = match code {
        codes::BUFFER_EXHAUSTED | codes::BUFFER_NO_SUITABLE_POOL | codes::POOL_EMPTY => {
            ErrorCategory::ResourceExhausted
        }
        codes::PROTOCOL_INVALID_FRAME_SIZE
        | codes::PROTOCOL_PACKET_TOO_LARGE
        | codes::PROTOCOL_MISSING_OPCODE
        | codes::PROTOCOL_MALFORMED => ErrorCategory::ProtocolViolation,
        codes::TRANSPORT_RESET | codes::TRANSPORT_IO => ErrorCategory::Retryable,
        codes::CONNECTION_CLOSED | codes::BUFFER_POOL_CLOSED => ErrorCategory::Cancelled,
        _ => return None,
    };
    Some(category)
}

const _: fn() = || {
    fn assert_error_traits<T: Error + Send + Sync + 'static>() {}

    assert_error_traits::<CoreError>();
    assert_error_traits::<AggregateError>();
};
