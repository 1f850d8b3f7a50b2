use tern_buffer::BufferError;
use tern_core::{CoreError, ErrorCategory, codes};
use thiserror::Error;

/// 分帧与报文读写的错误枚举。
///
/// 分帧错误（`InvalidFrameSize`、`PacketTooLarge`）对所在连接是致命的；
/// 报文体读取错误（`Truncated`、`Malformed`）只影响单个报文。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 头部声明的帧长越出 `[min, max]`。
    #[error("invalid frame size {declared}, expected a value in [{min}, {max}]")]
    InvalidFrameSize { declared: i64, min: usize, max: usize },
    /// 出站帧超过协议上限或目标缓冲容量。
    #[error("packet of {size} bytes exceeds the limit of {limit} bytes")]
    PacketTooLarge { size: usize, limit: usize },
    /// 报文缺少操作码。
    #[error("packet does not carry an opcode")]
    MissingOpcode,
    /// 报文体在读取完成前耗尽。
    #[error("packet truncated: needed {needed} bytes but only {remaining} remain")]
    Truncated { needed: usize, remaining: usize },
    /// 报文体内容非法。
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    /// 写入报文体时缓冲失败。
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl From<ProtocolError> for CoreError {
    fn from(error: ProtocolError) -> Self {
        let code = match &error {
            ProtocolError::InvalidFrameSize { .. } => codes::PROTOCOL_INVALID_FRAME_SIZE,
            ProtocolError::PacketTooLarge { .. } => codes::PROTOCOL_PACKET_TOO_LARGE,
            ProtocolError::MissingOpcode => codes::PROTOCOL_MISSING_OPCODE,
            ProtocolError::Truncated { .. } | ProtocolError::Malformed(_) => {
                codes::PROTOCOL_MALFORMED
            }
            ProtocolError::Buffer(inner) => return CoreError::from(inner.clone()),
        };
        CoreError::new(code, error.to_string()).with_category(ErrorCategory::ProtocolViolation)
    }
}
