//! 接收循环：读取、分帧、同步分派。
//!
//! 缓冲布局：`[0, packet_offset)` 为已分派的帧，`[packet_offset, received)` 为尚未成帧的字节，
//! `[received, len)` 为下一次读取的落点。

use tern_buffer::BufferSegment;
use tern_core::CoreError;
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionState};
use crate::{DispatchError, ReadOutcome};

struct ReceiveBuffer {
    segment: BufferSegment,
    steady_len: usize,
    received: usize,
    packet_offset: usize,
}

pub(super) async fn receive_loop(connection: Connection, segment: BufferSegment) {
    let inner = &connection.inner;
    let mut closing = inner.state.subscribe();
    let mut buffer = ReceiveBuffer {
        steady_len: segment.len(),
        segment,
        received: 0,
        packet_offset: 0,
    };

    loop {
        let outcome = {
            let spare = &mut buffer.segment.as_mut_slice()[buffer.received..];
            tokio::select! {
                biased;
                _ = closing.wait_for(|state| *state >= ConnectionState::Closing) => return,
                outcome = inner.transport.read(spare) => outcome,
            }
        };

        match outcome {
            ReadOutcome::Data(0) | ReadOutcome::Closed => {
                debug!(connection = %connection, "peer closed the stream");
                inner.close(None);
                return;
            }
            ReadOutcome::Reset => {
                debug!(connection = %connection, "peer reset the stream");
                inner.close(None);
                return;
            }
            ReadOutcome::Error(error) => {
                inner.close(Some(error));
                return;
            }
            ReadOutcome::Data(count) => {
                buffer.received += count;
                trace!(connection = %connection, count, "bytes received");
                if let Err(error) = buffer.drain(&connection) {
                    inner.close(Some(error));
                    return;
                }
                if !connection.is_open() {
                    return;
                }
            }
        }
    }
}

impl ReceiveBuffer {
    /// 从 `packet_offset` 起反复尝试成帧，直到需要更多字节。
    ///
    /// # 执行逻辑（How）
    /// - `remaining == 0`：已收字节恰好用尽，复位游标；缓冲曾为超大帧扩容时换回常规尺寸；
    /// - `remaining < 0`：后续帧已在缓冲中，`-remaining` 字节之前即为下一帧起点，立即继续；
    /// - `remaining > 0`：当前帧未收齐；剩余空间放得下则返回等待读取，
    ///   否则把未成帧的尾部搬到偏移 0，必要时换用能容纳整帧的更大分段。
    fn drain(&mut self, connection: &Connection) -> Result<(), CoreError> {
        let context = &connection.inner.context;
        loop {
            let available = self.received - self.packet_offset;
            let window = &self.segment.as_slice()[self.packet_offset..self.received];
            let result = context.protocol.try_read(window)?;
            let remaining = result.remaining;

            if let Some(packet) = result.packet {
                match context.router.handle(connection, packet) {
                    Ok(()) => {}
                    Err(DispatchError::Rejected(error)) => {
                        warn!(connection = %connection, error = %error, "packet rejected");
                    }
                    Err(DispatchError::Fatal(error)) => return Err(error),
                }
                if !connection.is_open() {
                    return Ok(());
                }
            }

            if remaining == 0 {
                self.received = 0;
                self.packet_offset = 0;
                self.shrink(connection);
                return Ok(());
            }

            if remaining < 0 {
                self.packet_offset = self.received - remaining.unsigned_abs();
                continue;
            }

            let needed = available + remaining.unsigned_abs();
            if self.packet_offset + needed <= self.segment.len() {
                return Ok(());
            }

            if needed > self.segment.len() {
                let mut larger = context.buffers.acquire_at_least(needed)?;
                larger.as_mut_slice()[..available]
                    .copy_from_slice(&self.segment.as_slice()[self.packet_offset..self.received]);
                debug!(connection = %connection, from = self.segment.len(), to = larger.len(), "receive buffer grown");
                self.segment = larger;
            } else {
                self.segment
                    .as_mut_slice()
                    .copy_within(self.packet_offset..self.received, 0);
            }
            self.received = available;
            self.packet_offset = 0;
            return Ok(());
        }
    }

    fn shrink(&mut self, connection: &Connection) {
        if self.segment.len() <= self.steady_len {
            return;
        }
        match connection
            .inner
            .context
            .buffers
            .acquire_at_least(self.steady_len)
        {
            Ok(smaller) => {
                debug!(connection = %connection, from = self.segment.len(), to = smaller.len(), "receive buffer shrunk");
                self.segment = smaller;
            }
            Err(error) => {
                debug!(connection = %connection, error = %error, "keeping the grown receive buffer");
            }
        }
    }
}
