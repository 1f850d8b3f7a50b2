use tern_core::{CoreError, ErrorCategory, codes};
use thiserror::Error;

/// 缓冲层的错误枚举。
///
/// 资源耗尽类错误（`Exhausted`、`TooSmall`、`NoSuitablePool`）可由调用方重试或拒绝工作，
/// 其余变体表示调用方的使用错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// 重试上限内未能取得分段。
    #[error("unable to allocate a {segment_size}-byte segment after {attempts} attempts")]
    Exhausted { segment_size: usize, attempts: usize },
    /// 请求尺寸超过池的分段尺寸。
    #[error("requested {requested} bytes but the pool's segment size is {segment_size}")]
    TooSmall {
        requested: usize,
        segment_size: usize,
    },
    /// 没有任何池能满足请求尺寸。
    #[error("can not find a buffer pool providing at least {requested} bytes")]
    NoSuitablePool { requested: usize },
    /// 归还的分段属于其他池。
    #[error("attempt to release a segment that belongs to another pool")]
    ForeignSegment,
    /// 分段区间越出所在块。
    #[error("range {offset}+{length} exceeds the block length {block_len}")]
    InvalidRange {
        offset: usize,
        length: usize,
        block_len: usize,
    },
    /// 池已关闭。
    #[error("buffer pool is closed")]
    PoolClosed,
    /// 构造参数非法。
    #[error("invalid buffer pool configuration: {0}")]
    InvalidConfig(&'static str),
    /// 游标写入或长度设置超过分段容量。
    #[error("length {requested} exceeds the segment capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
    /// 对只读游标执行写入。
    #[error("can not write to a read-only buffer stream")]
    ReadOnly,
}

impl From<BufferError> for CoreError {
    fn from(error: BufferError) -> Self {
        let (code, category) = match &error {
            BufferError::Exhausted { .. } => {
                (codes::BUFFER_EXHAUSTED, ErrorCategory::ResourceExhausted)
            }
            BufferError::TooSmall { .. } => {
                (codes::BUFFER_TOO_SMALL, ErrorCategory::ResourceExhausted)
            }
            BufferError::NoSuitablePool { .. } => (
                codes::BUFFER_NO_SUITABLE_POOL,
                ErrorCategory::ResourceExhausted,
            ),
            BufferError::ForeignSegment => {
                (codes::BUFFER_FOREIGN_SEGMENT, ErrorCategory::NonRetryable)
            }
            BufferError::InvalidRange { .. }
            | BufferError::CapacityExceeded { .. }
            | BufferError::ReadOnly => (codes::BUFFER_INVALID_RANGE, ErrorCategory::NonRetryable),
            BufferError::PoolClosed => (codes::BUFFER_POOL_CLOSED, ErrorCategory::Cancelled),
            BufferError::InvalidConfig(_) => {
                (codes::BUFFER_INVALID_CONFIG, ErrorCategory::NonRetryable)
            }
        };
        CoreError::new(code, error.to_string()).with_category(category)
    }
}
