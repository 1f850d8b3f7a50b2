use crate::{BufferError, BufferSegment};

/// 建立在单个 [`BufferSegment`] 之上的游标。
///
/// # 契约说明（What）
/// - `len <= capacity`，`position <= len`；
/// - 读取止于 `len`；写入从 `position` 开始并在必要时推高 `len`；
/// - 写入越过容量时整体失败，不做部分写入；
/// - 只读游标的 `len` 等于分段容量，任何写入返回 [`BufferError::ReadOnly`]。
#[derive(Debug)]
pub struct BufferStream {
    segment: BufferSegment,
    len: usize,
    position: usize,
    writable: bool,
}

impl BufferStream {
    /// 以空内容包装可写分段。
    pub fn new(segment: BufferSegment) -> Self {
        Self {
            segment,
            len: 0,
            position: 0,
            writable: true,
        }
    }

    /// 以既有内容长度包装可写分段。
    pub fn with_len(segment: BufferSegment, len: usize) -> Result<Self, BufferError> {
        let mut stream = Self::new(segment);
        stream.set_len(len)?;
        Ok(stream)
    }

    /// 以整段内容包装只读分段。
    pub fn readonly(segment: BufferSegment) -> Self {
        let len = segment.len();
        Self {
            segment,
            len,
            position: 0,
            writable: false,
        }
    }

    /// 分段容量。
    pub fn capacity(&self) -> usize {
        self.segment.len()
    }

    /// 逻辑长度。
    pub fn len(&self) -> usize {
        self.len
    }

    /// 逻辑长度是否为 0。
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 是否可写。
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// 当前游标位置。
    pub fn position(&self) -> usize {
        self.position
    }

    /// 移动游标；越过 `len` 时返回错误。
    pub fn set_position(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.len {
            return Err(BufferError::CapacityExceeded {
                requested: position,
                capacity: self.len,
            });
        }
        self.position = position;
        Ok(())
    }

    /// 相对当前位置移动游标，返回新位置。
    pub fn seek(&mut self, delta: isize) -> Result<usize, BufferError> {
        let target = self
            .position
            .checked_add_signed(delta)
            .ok_or(BufferError::CapacityExceeded {
                requested: 0,
                capacity: self.len,
            })?;
        self.set_position(target)?;
        Ok(target)
    }

    /// 调整逻辑长度；游标超出新长度时被截到末尾。
    pub fn set_len(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.capacity() {
            return Err(BufferError::CapacityExceeded {
                requested: len,
                capacity: self.capacity(),
            });
        }
        if !self.writable && len != self.len {
            return Err(BufferError::ReadOnly);
        }
        self.len = len;
        self.position = self.position.min(len);
        Ok(())
    }

    /// 从游标处写入全部字节。
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if !self.writable {
            return Err(BufferError::ReadOnly);
        }
        let end = self
            .position
            .checked_add(bytes.len())
            .filter(|end| *end <= self.capacity())
            .ok_or(BufferError::CapacityExceeded {
                requested: self.position.saturating_add(bytes.len()),
                capacity: self.capacity(),
            })?;
        self.segment[self.position..end].copy_from_slice(bytes);
        self.position = end;
        self.len = self.len.max(end);
        Ok(())
    }

    /// 从游标处写入 `count` 个零字节。
    pub fn fill_zero(&mut self, count: usize) -> Result<(), BufferError> {
        if !self.writable {
            return Err(BufferError::ReadOnly);
        }
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.capacity())
            .ok_or(BufferError::CapacityExceeded {
                requested: self.position.saturating_add(count),
                capacity: self.capacity(),
            })?;
        self.segment[self.position..end].fill(0);
        self.position = end;
        self.len = self.len.max(end);
        Ok(())
    }

    /// 从游标处读取至多 `out.len()` 字节，返回实际读取量。
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.len - self.position);
        out[..count].copy_from_slice(&self.segment[self.position..self.position + count]);
        self.position += count;
        count
    }

    /// `[0, len)` 的只读视图。
    pub fn as_slice(&self) -> &[u8] {
        &self.segment[..self.len]
    }

    /// 归还底层分段所有权。
    pub fn into_segment(self) -> BufferSegment {
        self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_extend_len_up_to_capacity() {
        let mut stream = BufferStream::new(BufferSegment::detached(8));
        stream.write(&[1, 2, 3]).expect("容量内写入应成功");
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.position(), 3);

        let err = stream.write(&[0; 6]).expect_err("越过容量应失败");
        assert_eq!(
            err,
            BufferError::CapacityExceeded {
                requested: 9,
                capacity: 8
            }
        );
        assert_eq!(stream.len(), 3, "失败的写入不应改变长度");

        stream.fill_zero(5).expect("恰好填满容量");
        assert_eq!(stream.len(), 8);
    }

    #[test]
    fn overwrite_keeps_len() {
        let mut stream = BufferStream::new(BufferSegment::detached(8));
        stream.write(&[9; 6]).expect("写入失败");
        stream.set_position(1).expect("移动游标失败");
        stream.write(&[1, 2]).expect("覆写失败");
        assert_eq!(stream.len(), 6);
        assert_eq!(stream.as_slice(), &[9, 1, 2, 9, 9, 9]);
    }

    #[test]
    fn reads_stop_at_len() {
        let mut stream = BufferStream::new(BufferSegment::detached(16));
        stream.write(b"hello").expect("写入失败");
        stream.set_position(0).expect("移动游标失败");

        let mut out = [0u8; 8];
        assert_eq!(stream.read(&mut out), 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(stream.read(&mut out), 0);
    }

    #[test]
    fn set_len_clamps_position() {
        let mut stream = BufferStream::with_len(BufferSegment::detached(8), 6).expect("长度合法");
        stream.set_position(6).expect("移动到末尾");
        stream.set_len(2).expect("缩短长度");
        assert_eq!(stream.position(), 2);
        assert!(stream.set_len(9).is_err());
        assert!(stream.seek(-3).is_err(), "游标不能移到 0 之前");
        assert_eq!(stream.seek(-2).expect("回到起点"), 0);
    }

    #[test]
    fn readonly_rejects_writes() {
        let mut stream = BufferStream::readonly(BufferSegment::detached(4));
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.write(&[1]), Err(BufferError::ReadOnly));
        assert_eq!(stream.fill_zero(1), Err(BufferError::ReadOnly));
    }
}
