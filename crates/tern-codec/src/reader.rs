use crate::ProtocolError;

/// 借用字节切片的报文体读取游标。
///
/// # 契约说明（What）
/// - 所有多字节整数与浮点数按小端读取；
/// - 字符串以 7 位变长整数表示的 UTF-8 字节长度开头；
/// - 读取越界返回 [`ProtocolError::Truncated`]，游标保持不动。
///
/// # 实现策略（How）
/// - 读取器不拥有内存，生命周期受限于接收缓冲；需要跨越分派调用保存数据时应自行复制。
#[derive(Clone, Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    position: usize,
}

macro_rules! read_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("读取小端 `", stringify!($ty), "`。")]
            pub fn $name(&mut self) -> Result<$ty, ProtocolError> {
                let bytes = self.take_array::<{ core::mem::size_of::<$ty>() }>()?;
                Ok(<$ty>::from_le_bytes(bytes))
            }
        )*
    };
}

impl<'a> PacketReader<'a> {
    /// 以整个切片为报文体构造。
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// 报文体总长度。
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 报文体是否为空。
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 当前游标位置。
    pub fn position(&self) -> usize {
        self.position
    }

    /// 未读字节数。
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// 移动游标；越过末尾时返回错误。
    pub fn set_position(&mut self, position: usize) -> Result<(), ProtocolError> {
        if position > self.data.len() {
            return Err(ProtocolError::Truncated {
                needed: position,
                remaining: self.data.len(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// 跳过 `count` 字节。
    pub fn skip(&mut self, count: usize) -> Result<(), ProtocolError> {
        self.take(count).map(|_| ())
    }

    /// 借出接下来的 `count` 字节。
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(count)
    }

    /// 借出全部未读字节。
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let rest = &self.data[self.position..];
        self.position = self.data.len();
        rest
    }

    read_le! {
        read_u16 => u16,
        read_i16 => i16,
        read_u32 => u32,
        read_i32 => i32,
        read_u64 => u64,
        read_i64 => i64,
        read_f32 => f32,
        read_f64 => f64,
    }

    /// 读取单字节。
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// 读取有符号单字节。
    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.read_u8()? as i8)
    }

    /// 读取布尔值，非零即真。
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// 读取 7 位变长编码的无符号整数（至多 5 字节）。
    pub fn read_varint(&mut self) -> Result<u32, ProtocolError> {
        let start = self.position;
        let mut value = 0u32;
        for index in 0..5 {
            let byte = match self.read_u8() {
                Ok(byte) => byte,
                Err(err) => {
                    self.position = start;
                    return Err(err);
                }
            };
            if index == 4 && byte > 0x0F {
                self.position = start;
                return Err(ProtocolError::Malformed("7-bit encoded integer overflows u32"));
            }
            value |= u32::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        self.position = start;
        Err(ProtocolError::Malformed("7-bit encoded integer overflows u32"))
    }

    /// 读取长度前缀的 UTF-8 字符串。
    pub fn read_str(&mut self) -> Result<&'a str, ProtocolError> {
        let start = self.position;
        let len = self.read_varint()? as usize;
        let bytes = match self.take(len) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.position = start;
                return Err(err);
            }
        };
        core::str::from_utf8(bytes).map_err(|_| {
            self.position = start;
            ProtocolError::Malformed("string is not valid UTF-8")
        })
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if count > remaining {
            return Err(ProtocolError::Truncated {
                needed: count,
                remaining,
            });
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
