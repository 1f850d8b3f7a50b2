#![doc = r#"
# tern-codec

## 设计动机（Why）
- 连接层只关心“字节流进、报文出”，具体的分帧格式由可替换的 [`Protocol`] 实现决定；
- 报文体的结构化读写与分帧解耦：[`PacketReader`] 直接借用接收缓冲，[`PacketWriter`] 写入池化分段。

## 核心契约（What）
- [`Protocol::try_read`] 返回带符号的 `remaining`：
  - `> 0`：至少还需要这么多字节才能产出报文；
  - `== 0`：缓冲恰好包含一个完整帧；
  - `< 0`：帧已完整，且缓冲中还有 `-remaining` 字节属于下一帧。
- [`FixedHeaderProtocol`] 的线上格式：`[i32 LE 帧总长][i32 LE 操作码][负载]`，帧总长包含 8 字节头。

## 风险与考量（Trade-offs）
- 协议实例以 `&self` 工作并要求 `Send + Sync`，有会话状态的协议需自行使用内部可变性。
"#]

mod error;
mod fixed;
mod opcode;
mod packet;
mod protocol;
mod reader;
mod writer;

pub use error::ProtocolError;
pub use fixed::FixedHeaderProtocol;
pub use opcode::Opcode;
pub use packet::{InboundPacket, OutboundPacket};
pub use protocol::{Protocol, ReadResult};
pub use reader::PacketReader;
pub use writer::PacketWriter;
