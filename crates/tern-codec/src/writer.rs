use tern_buffer::{BufferSegment, BufferStream};

use crate::ProtocolError;

/// 写入池化分段的报文体构造器。
///
/// # 契约说明（What）
/// - 编码规则与 [`PacketReader`](crate::PacketReader) 对称：小端数值、7 位变长长度前缀的 UTF-8 字符串；
/// - 报文体长度上限为分段容量，越界写入整体失败并返回 [`ProtocolError::Buffer`]；
/// - 写入器被丢弃时分段随之归还到所属池。
#[derive(Debug)]
pub struct PacketWriter {
    stream: BufferStream,
}

macro_rules! write_le {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("写入小端 `", stringify!($ty), "`。")]
            pub fn $name(&mut self, value: $ty) -> Result<(), ProtocolError> {
                self.write_bytes(&value.to_le_bytes())
            }
        )*
    };
}

impl PacketWriter {
    /// 以空报文体包装分段。
    pub fn new(segment: BufferSegment) -> Self {
        Self {
            stream: BufferStream::new(segment),
        }
    }

    /// 以非池化内存构造，容量为 `capacity`。
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(BufferSegment::detached(capacity))
    }

    /// 已写入的报文体长度。
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    /// 报文体是否为空。
    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// 可写入的最大长度。
    pub fn capacity(&self) -> usize {
        self.stream.capacity()
    }

    /// 当前游标位置。
    pub fn position(&self) -> usize {
        self.stream.position()
    }

    /// 移动游标，用于回填先前预留的字段。
    pub fn set_position(&mut self, position: usize) -> Result<(), ProtocolError> {
        Ok(self.stream.set_position(position)?)
    }

    /// 调整报文体长度。
    pub fn set_len(&mut self, len: usize) -> Result<(), ProtocolError> {
        Ok(self.stream.set_len(len)?)
    }

    /// 已写入内容的只读视图。
    pub fn as_slice(&self) -> &[u8] {
        self.stream.as_slice()
    }

    /// 写入原始字节。
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        Ok(self.stream.write(bytes)?)
    }

    /// 写入 `count` 个零字节。
    pub fn fill_zero(&mut self, count: usize) -> Result<(), ProtocolError> {
        Ok(self.stream.fill_zero(count)?)
    }

    /// 写入单字节。
    pub fn write_u8(&mut self, value: u8) -> Result<(), ProtocolError> {
        self.write_bytes(&[value])
    }

    /// 写入有符号单字节。
    pub fn write_i8(&mut self, value: i8) -> Result<(), ProtocolError> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// 写入布尔值，`true` 为 1。
    pub fn write_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.write_u8(u8::from(value))
    }

    write_le! {
        write_u16 => u16,
        write_i16 => i16,
        write_u32 => u32,
        write_i32 => i32,
        write_u64 => u64,
        write_i64 => i64,
        write_f32 => f32,
        write_f64 => f64,
    }

    /// 写入 7 位变长编码的无符号整数。
    pub fn write_varint(&mut self, mut value: u32) -> Result<(), ProtocolError> {
        let mut encoded = [0u8; 5];
        let mut len = 0;
        while value >= 0x80 {
            encoded[len] = (value as u8) | 0x80;
            value >>= 7;
            len += 1;
        }
        encoded[len] = value as u8;
        self.write_bytes(&encoded[..=len])
    }

    /// 写入长度前缀的 UTF-8 字符串。
    pub fn write_str(&mut self, value: &str) -> Result<(), ProtocolError> {
        let len = u32::try_from(value.len())
            .map_err(|_| ProtocolError::Malformed("string longer than u32::MAX bytes"))?;
        let start = self.stream.position();
        let previous_len = self.stream.len();
        self.write_varint(len)?;
        if let Err(err) = self.write_bytes(value.as_bytes()) {
            // 长度前缀已写出但正文失败：回退，保持写入的原子性。
            self.stream.set_len(previous_len)?;
            self.stream.set_position(start.min(previous_len))?;
            return Err(err);
        }
        Ok(())
    }

    /// 取回底层分段。
    pub fn into_segment(self) -> BufferSegment {
        self.stream.into_segment()
    }
}
