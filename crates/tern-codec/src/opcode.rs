use core::fmt;

/// 报文类型标识，路由器据此分派处理器。
///
/// 线上以 4 字节小端整数表示；展示形式固定为 `0x{:08X}`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u32);

impl Opcode {
    /// 原始数值。
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Opcode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_as_padded_hex() {
        assert_eq!(Opcode(1).to_string(), "0x00000001");
        assert_eq!(Opcode(0xDEAD_BEEF).to_string(), "0xDEADBEEF");
    }
}
