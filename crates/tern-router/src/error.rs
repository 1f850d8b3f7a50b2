use std::borrow::Cow;

use tern_codec::Opcode;
use tern_core::{CoreError, ErrorCategory, codes};
use thiserror::Error;

/// 路由注册、查询与分派过程中的错误。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// 同一控制器类型已注册。
    #[error("can not register controller {controller}: this controller is already registered")]
    DuplicateController { controller: &'static str },
    /// 控制器声明的操作码与已注册处理函数冲突。
    #[error("can not register controller {controller}: opcode handler duplicate, opcode {opcode}")]
    DuplicateOpcode {
        controller: &'static str,
        opcode: Opcode,
    },
    /// 报文操作码未注册。
    #[error("unknown packet opcode {opcode}")]
    UnknownOpcode { opcode: Opcode },
    /// 报文未携带操作码。
    #[error("packet carries no opcode")]
    MissingOpcode,
    /// 校验器拒绝报文。
    #[error("packet {opcode} failed validation: {reason}")]
    ValidationFailed {
        opcode: Opcode,
        reason: Cow<'static, str>,
    },
    /// 控制器未注册。
    #[error("controller '{controller}' was not found in the router")]
    ControllerNotFound { controller: &'static str },
}

impl From<RouterError> for CoreError {
    fn from(error: RouterError) -> Self {
        let (code, category) = match &error {
            RouterError::DuplicateController { .. } => {
                (codes::ROUTER_DUPLICATE_CONTROLLER, ErrorCategory::NonRetryable)
            }
            RouterError::DuplicateOpcode { .. } => {
                (codes::ROUTER_DUPLICATE_OPCODE, ErrorCategory::NonRetryable)
            }
            RouterError::UnknownOpcode { .. } => {
                (codes::ROUTER_UNKNOWN_OPCODE, ErrorCategory::ProtocolViolation)
            }
            RouterError::MissingOpcode => {
                (codes::PROTOCOL_MISSING_OPCODE, ErrorCategory::ProtocolViolation)
            }
            RouterError::ValidationFailed { .. } => {
                (codes::ROUTER_VALIDATION_FAILED, ErrorCategory::NonRetryable)
            }
            RouterError::ControllerNotFound { .. } => {
                (codes::ROUTER_CONTROLLER_NOT_FOUND, ErrorCategory::NonRetryable)
            }
        };
        CoreError::new(code, error.to_string()).with_category(category)
    }
}

/// 校验器给出的拒绝原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    reason: Cow<'static, str>,
}

impl ValidationError {
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub(crate) fn into_reason(self) -> Cow<'static, str> {
        self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_categories_follow_variant() {
        let duplicate: CoreError = RouterError::DuplicateOpcode {
            controller: "Login",
            opcode: Opcode(7),
        }
        .into();
        assert_eq!(duplicate.code(), codes::ROUTER_DUPLICATE_OPCODE);
        assert_eq!(duplicate.category(), ErrorCategory::NonRetryable);
        assert!(duplicate.message().contains("0x00000007"));

        let missing: CoreError = RouterError::MissingOpcode.into();
        assert_eq!(missing.code(), codes::PROTOCOL_MISSING_OPCODE);
        assert_eq!(missing.category(), ErrorCategory::ProtocolViolation);
    }
}
