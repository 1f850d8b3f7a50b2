use tern_buffer::BufferSegment;

use crate::{Opcode, PacketReader, PacketWriter};

/// 从接收缓冲中解出的入站报文。
///
/// 负载直接借用连接的接收缓冲，仅在同步分派期间有效。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InboundPacket<'a> {
    opcode: Option<Opcode>,
    payload: &'a [u8],
}

impl<'a> InboundPacket<'a> {
    /// 构造带操作码的报文。
    pub fn new(opcode: Opcode, payload: &'a [u8]) -> Self {
        Self {
            opcode: Some(opcode),
            payload,
        }
    }

    /// 构造不带操作码的报文，供不使用操作码分帧的协议使用。
    pub fn untagged(payload: &'a [u8]) -> Self {
        Self {
            opcode: None,
            payload,
        }
    }

    /// 操作码。
    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    /// 负载字节。
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// 负载上的读取游标。
    pub fn reader(&self) -> PacketReader<'a> {
        PacketReader::new(self.payload)
    }
}

/// 待发送的出站报文：操作码加报文体写入器。
///
/// # 契约说明（What）
/// - 报文体写入池化分段，发送完成（或报文被丢弃）时分段归还；
/// - 同一报文对象发送后即被消费，不可重复发送。
#[derive(Debug)]
pub struct OutboundPacket {
    opcode: Opcode,
    writer: PacketWriter,
}

impl OutboundPacket {
    /// 以给定分段承载报文体。
    pub fn new(opcode: Opcode, segment: BufferSegment) -> Self {
        Self {
            opcode,
            writer: PacketWriter::new(segment),
        }
    }

    /// 以非池化内存承载报文体。
    pub fn with_capacity(opcode: Opcode, capacity: usize) -> Self {
        Self {
            opcode,
            writer: PacketWriter::with_capacity(capacity),
        }
    }

    /// 操作码。
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// 已写入的报文体。
    pub fn payload(&self) -> &[u8] {
        self.writer.as_slice()
    }

    /// 报文体写入器。
    pub fn writer(&mut self) -> &mut PacketWriter {
        &mut self.writer
    }

    /// 拆出操作码与写入器。
    pub fn into_parts(self) -> (Opcode, PacketWriter) {
        (self.opcode, self.writer)
    }
}
