use tern_buffer::BufferError;
use tern_codec::ProtocolError;
use tern_core::{CoreError, ErrorCategory, codes};
use thiserror::Error;

/// 连接操作的错误枚举。
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// `begin_receive` 被重复调用。
    #[error("receiving is already started on this connection")]
    AlreadyReceiving,
    /// 连接已关闭。
    #[error("connection is closed")]
    Closed,
    /// 出站报文序列化失败。
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    /// 接收或发送缓冲租借失败。
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// 传输层写出失败。
    #[error("{0}")]
    Transport(CoreError),
    /// 当前线程不在 Tokio 运行时内。
    #[error("a Tokio runtime is required to drive connections")]
    RuntimeUnavailable,
}

impl ConnectionError {
    /// 转换为核心错误而不消费自身。
    pub(crate) fn to_core(&self) -> CoreError {
        match self {
            ConnectionError::AlreadyReceiving => {
                CoreError::new(codes::CONNECTION_ALREADY_RECEIVING, self.to_string())
                    .with_category(ErrorCategory::NonRetryable)
            }
            ConnectionError::Closed => CoreError::new(codes::CONNECTION_CLOSED, self.to_string()),
            ConnectionError::Encode(inner) => CoreError::from(inner.clone()),
            ConnectionError::Buffer(inner) => CoreError::from(inner.clone()),
            ConnectionError::Transport(inner) => inner.duplicate(),
            ConnectionError::RuntimeUnavailable => {
                CoreError::new(codes::RUNTIME_UNAVAILABLE, self.to_string())
                    .with_category(ErrorCategory::NonRetryable)
            }
        }
    }
}

impl From<ConnectionError> for CoreError {
    fn from(error: ConnectionError) -> Self {
        match error {
            ConnectionError::Transport(inner) => inner,
            other => other.to_core(),
        }
    }
}

/// 连接池的错误枚举。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// 池中没有任何连接。
    #[error("can not request connection: pool is empty")]
    Empty,
    /// 当前线程不在 Tokio 运行时内，无法启动补足定时器。
    #[error("a Tokio runtime is required to open an active connection pool")]
    RuntimeUnavailable,
}

impl From<PoolError> for CoreError {
    fn from(error: PoolError) -> Self {
        let code = match error {
            PoolError::Empty => codes::POOL_EMPTY,
            PoolError::RuntimeUnavailable => codes::RUNTIME_UNAVAILABLE,
        };
        CoreError::new(code, error.to_string())
    }
}

/// 监听器的错误枚举。
#[derive(Debug, Error)]
pub enum ListenerError {
    /// 已在监听，需先停止。
    #[error("already listening; stop listening first")]
    AlreadyListening,
    /// 未在监听。
    #[error("listener is not listening")]
    NotListening,
    /// 绑定监听端点失败。
    #[error("failed to bind the listening endpoint: {0}")]
    Bind(CoreError),
}

impl From<ListenerError> for CoreError {
    fn from(error: ListenerError) -> Self {
        match error {
            ListenerError::AlreadyListening => {
                CoreError::new(codes::LISTENER_ALREADY_LISTENING, error.to_string())
            }
            ListenerError::NotListening => {
                CoreError::new(codes::LISTENER_NOT_LISTENING, error.to_string())
            }
            ListenerError::Bind(inner) => inner,
        }
    }
}
