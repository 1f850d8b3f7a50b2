use crate::{InboundPacket, OutboundPacket, ProtocolError};

/// 一次增量读取的结果。
///
/// # 契约说明（What）
/// - `remaining > 0`：还需要至少 `remaining` 字节，`packet` 为 `None`；
/// - `remaining == 0`：输入恰好是一个完整帧，`packet` 为 `Some`；
/// - `remaining < 0`：帧已完整，输入末尾还有 `-remaining` 字节属于下一帧，`packet` 为 `Some`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadResult<'a> {
    pub remaining: isize,
    pub packet: Option<InboundPacket<'a>>,
}

impl<'a> ReadResult<'a> {
    /// 需要更多字节。
    pub fn need_more(remaining: usize) -> Self {
        Self {
            remaining: remaining as isize,
            packet: None,
        }
    }

    /// 产出一个报文，`frame_len` 为该帧占用的字节数，`available` 为输入总长度。
    pub fn complete(packet: InboundPacket<'a>, frame_len: usize, available: usize) -> Self {
        Self {
            remaining: frame_len as isize - available as isize,
            packet: Some(packet),
        }
    }

    /// 本次读取消耗的字节数；未产出报文时为 0。
    pub fn consumed(&self, available: usize) -> usize {
        match self.packet {
            Some(_) => (available as isize + self.remaining) as usize,
            None => 0,
        }
    }
}

/// 分帧协议：把字节流切分为报文，并把报文序列化为帧。
///
/// # 设计动机（Why）
/// - 连接只持有 `Arc<dyn Protocol>`，接收循环与发送路径共享同一实例；
/// - 带符号的 `remaining` 让调用方在一次读取中连续解出多个帧，无需额外拷贝。
///
/// # 契约说明（What）
/// - [`try_read`](Self::try_read) 只检查输入的前缀，从不修改输入；
/// - 声明帧长越界属于致命错误，调用方应关闭连接；
/// - [`write`](Self::write) 返回写入的字节数，恒等于 [`calculate_packet_size`](Self::calculate_packet_size)。
pub trait Protocol: Send + Sync + 'static {
    /// 帧头字节数。
    fn header_size(&self) -> usize;

    /// 单帧允许的最大字节数（含帧头）。
    fn max_packet_size(&self) -> usize;

    /// 接收缓冲的推荐尺寸。
    fn recommended_buffer_size(&self) -> usize {
        self.max_packet_size()
    }

    /// 从 `buffer` 的起始位置尝试解出一个帧。
    fn try_read<'a>(&self, buffer: &'a [u8]) -> Result<ReadResult<'a>, ProtocolError>;

    /// 出站报文序列化后的帧长。
    fn calculate_packet_size(&self, packet: &OutboundPacket) -> usize;

    /// 把报文写入 `out` 的起始位置。
    fn write(&self, packet: &OutboundPacket, out: &mut [u8]) -> Result<usize, ProtocolError>;
}
