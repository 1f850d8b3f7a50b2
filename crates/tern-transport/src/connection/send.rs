//! 发送路径：调用方线程编码，写出任务按入队顺序逐帧写出。

use std::sync::{Arc, Weak};

use tern_buffer::BufferSegment;
use tern_codec::OutboundPacket;
use tern_core::CoreError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::trace;

use super::{ConnectionContext, ConnectionInner, ConnectionState};
use crate::{ConnectionError, Transport};

/// 已编码、等待写出的帧；分段在写出结束后随帧一起释放回池。
pub(super) struct OutboundFrame {
    segment: BufferSegment,
    len: usize,
    pub(super) reply: Option<oneshot::Sender<Result<(), CoreError>>>,
}

pub(super) fn encode(
    context: &ConnectionContext,
    packet: &OutboundPacket,
) -> Result<OutboundFrame, ConnectionError> {
    let size = context.protocol.calculate_packet_size(packet);
    let mut segment = context.buffers.acquire_at_least(size)?;
    let len = context.protocol.write(packet, segment.as_mut_slice())?;
    Ok(OutboundFrame {
        segment,
        len,
        reply: None,
    })
}

/// 单写者循环。
///
/// 只持有连接的弱引用：所有句柄释放后出站队列随之关闭，循环自然结束。
pub(super) async fn write_loop(
    connection: Weak<ConnectionInner>,
    transport: Arc<dyn Transport>,
    mut closing: watch::Receiver<ConnectionState>,
    mut queue: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = closing.wait_for(|state| *state >= ConnectionState::Closing) => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let OutboundFrame {
            segment,
            len,
            reply,
        } = frame;
        let written = transport.write_all(&segment.as_slice()[..len]).await;
        drop(segment);

        match written {
            Ok(()) => {
                trace!(len, "frame written");
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(error) => {
                let reported = error.duplicate();
                if let Some(inner) = connection.upgrade() {
                    inner.close(Some(error));
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Err(reported));
                }
                break;
            }
        }
    }
}
