use std::io;

use tern_core::{CoreError, ErrorCategory};

/// 产生 IO 错误的套接字操作，决定错误码与消息前缀。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TcpOp {
    Bind,
    Accept,
    Connect,
    Read,
    Write,
    Shutdown,
    Configure,
}

impl TcpOp {
    pub(crate) const fn code(self) -> &'static str {
        match self {
            TcpOp::Bind => "transport.tcp.bind_failed",
            TcpOp::Accept => "transport.tcp.accept_failed",
            TcpOp::Connect => "transport.tcp.connect_failed",
            TcpOp::Read => "transport.tcp.read_failed",
            TcpOp::Write => "transport.tcp.write_failed",
            TcpOp::Shutdown => "transport.tcp.shutdown_failed",
            TcpOp::Configure => "transport.tcp.configure_failed",
        }
    }

    const fn verb(self) -> &'static str {
        match self {
            TcpOp::Bind => "bind",
            TcpOp::Accept => "accept",
            TcpOp::Connect => "connect",
            TcpOp::Read => "read",
            TcpOp::Write => "write",
            TcpOp::Shutdown => "shutdown",
            TcpOp::Configure => "configure",
        }
    }

    /// 包装 IO 错误：错误码取自操作，分类取自 `ErrorKind`，原始错误保留为根因。
    pub(crate) fn fail(self, error: io::Error) -> CoreError {
        CoreError::new(self.code(), format!("tcp {} failed: {error}", self.verb()))
            .with_category(category_of(error.kind()))
            .with_cause(error)
    }
}

/// 对端重置或中止连接，接收循环按正常关闭处理。
pub(crate) fn is_reset(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

fn category_of(kind: io::ErrorKind) -> ErrorCategory {
    use io::ErrorKind::*;
    match kind {
        TimedOut => ErrorCategory::Timeout,
        OutOfMemory => ErrorCategory::ResourceExhausted,
        WouldBlock | Interrupted | ConnectionRefused | ConnectionReset | ConnectionAborted
        | NotConnected | AddrInUse | AddrNotAvailable | BrokenPipe | WriteZero => {
            ErrorCategory::Retryable
        }
        _ => ErrorCategory::NonRetryable,
    }
}
