//! 集成测试共享夹具：记录型路由器、默认连接上下文与帧编码辅助。

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tern_buffer::{BufferPool, BufferPoolManager};
use tern_codec::{FixedHeaderProtocol, InboundPacket, Opcode, OutboundPacket, Protocol};
use tern_core::{CoreError, codes};
use tern_transport::{ConnectionContext, DispatchError, PacketRouter, Session};
use tokio::sync::mpsc;

/// 路由器收到的报文副本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub opcode: u32,
    pub payload: Vec<u8>,
}

/// 把每个报文转发到通道的路由器；`REJECT` 与 `FATAL` 两个操作码分别触发两种分派失败。
pub struct RecordingRouter {
    tx: mpsc::UnboundedSender<Received>,
}

pub const REJECT: u32 = 0xDEAD;
pub const FATAL: u32 = 0xBEEF;

impl RecordingRouter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Received>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PacketRouter for RecordingRouter {
    fn handle(&self, _session: &dyn Session, packet: InboundPacket<'_>) -> Result<(), DispatchError> {
        let opcode = packet.opcode().map(Opcode::get).unwrap_or_default();
        match opcode {
            REJECT => Err(DispatchError::Rejected(CoreError::new(
                codes::ROUTER_VALIDATION_FAILED,
                "rejected by test router",
            ))),
            FATAL => Err(DispatchError::Fatal(CoreError::new(
                codes::ROUTER_HANDLER_FAILED,
                "fatal failure from test router",
            ))),
            _ => {
                let _ = self.tx.send(Received {
                    opcode,
                    payload: packet.payload().to_vec(),
                });
                Ok(())
            }
        }
    }
}

/// 小分段 4 KiB、大分段 64 KiB，均允许扩容。
pub fn buffers() -> BufferPoolManager {
    BufferPoolManager::with_pools([
        BufferPool::new(4096, 32, true).expect("构造小分段池失败"),
        BufferPool::new(64 * 1024, 4, true).expect("构造大分段池失败"),
    ])
}

pub fn context(router: Arc<dyn PacketRouter>) -> ConnectionContext {
    ConnectionContext::new(Arc::new(FixedHeaderProtocol::new()), router, buffers())
}

/// 以参考协议编码一帧。
pub fn frame(opcode: u32, payload: &[u8]) -> Vec<u8> {
    let protocol = FixedHeaderProtocol::new();
    let mut packet = OutboundPacket::with_capacity(Opcode(opcode), payload.len().max(1));
    packet.writer().write_bytes(payload).expect("写入负载失败");
    let mut out = vec![0u8; protocol.calculate_packet_size(&packet)];
    let written = protocol.write(&packet, &mut out).expect("编码帧失败");
    out.truncate(written);
    out
}

pub fn packet(opcode: u32, payload: &[u8]) -> OutboundPacket {
    let mut packet = OutboundPacket::with_capacity(Opcode(opcode), payload.len().max(1));
    packet.writer().write_bytes(payload).expect("写入负载失败");
    packet
}

/// 在限定时间内等待下一个报文。
pub async fn next(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("等待报文超时")
        .expect("路由器通道已关闭")
}

/// 断言短时间内没有报文到达。
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Received>) {
    let outcome = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(outcome.is_err(), "不应有报文到达: {outcome:?}");
}

/// 轮询直到条件成立或超时。
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("条件在超时前未成立");
}
