use tern_core::config::ProtocolConfig;
use tracing::trace;

use crate::{InboundPacket, Opcode, OutboundPacket, Protocol, ProtocolError, ReadResult};

/// 定长头的长度前缀协议。
///
/// # 线上格式（What）
/// ```text
/// 偏移 0: i32 LE 帧总长（包含 8 字节头）
/// 偏移 4: i32 LE 操作码
/// 偏移 8: 负载 [帧总长 - 8]
/// ```
/// - 帧总长必须落在 `[HEADER_SIZE, max_packet_size]`，否则返回 [`ProtocolError::InvalidFrameSize`]；
/// - 帧长前缀未到齐时 `remaining` 为帧头缺口，到齐后为整帧缺口；
/// - 推荐接收缓冲尺寸等于 `max_packet_size`。
///
/// # 实现策略（How）
/// - 协议本身无状态，可在任意数量的连接间共享。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedHeaderProtocol {
    max_packet_size: usize,
}

impl FixedHeaderProtocol {
    /// 帧头字节数：帧长 + 操作码。
    pub const HEADER_SIZE: usize = 8;

    /// 帧长前缀字节数。
    pub const LENGTH_SIZE: usize = 4;

    /// 以默认帧上限（64 KiB）构造。
    pub fn new() -> Self {
        Self {
            max_packet_size: ProtocolConfig::DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// 指定帧上限；取值被限制在 `[HEADER_SIZE, i32::MAX]` 之内。
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.clamp(Self::HEADER_SIZE, i32::MAX as usize),
        }
    }

    /// 按配置节构造。
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::with_max_packet_size(config.max_packet_size)
    }
}

impl Default for FixedHeaderProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for FixedHeaderProtocol {
    fn header_size(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn try_read<'a>(&self, buffer: &'a [u8]) -> Result<ReadResult<'a>, ProtocolError> {
        let available = buffer.len();
        if available < Self::LENGTH_SIZE {
            return Ok(ReadResult::need_more(Self::HEADER_SIZE - available));
        }

        let declared = i32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
        let frame_len = usize::try_from(declared)
            .ok()
            .filter(|len| (Self::HEADER_SIZE..=self.max_packet_size).contains(len))
            .ok_or(ProtocolError::InvalidFrameSize {
                declared: i64::from(declared),
                min: Self::HEADER_SIZE,
                max: self.max_packet_size,
            })?;

        if frame_len > available {
            return Ok(ReadResult::need_more(frame_len - available));
        }

        let opcode = Opcode(u32::from_le_bytes([
            buffer[4], buffer[5], buffer[6], buffer[7],
        ]));
        trace!(%opcode, bytes = frame_len, "frame decoded");
        let packet = InboundPacket::new(opcode, &buffer[Self::HEADER_SIZE..frame_len]);
        Ok(ReadResult::complete(packet, frame_len, available))
    }

    fn calculate_packet_size(&self, packet: &OutboundPacket) -> usize {
        packet.payload().len() + Self::HEADER_SIZE
    }

    fn write(&self, packet: &OutboundPacket, out: &mut [u8]) -> Result<usize, ProtocolError> {
        let size = self.calculate_packet_size(packet);
        let limit = self.max_packet_size.min(out.len());
        if size > limit {
            return Err(ProtocolError::PacketTooLarge { size, limit });
        }

        // size <= max_packet_size <= i32::MAX
        out[..4].copy_from_slice(&(size as u32).to_le_bytes());
        out[4..8].copy_from_slice(&packet.opcode().get().to_le_bytes());
        out[Self::HEADER_SIZE..size].copy_from_slice(packet.payload());
        Ok(size)
    }
}
