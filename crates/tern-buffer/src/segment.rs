use core::{
    fmt,
    hash::{Hash, Hasher},
    mem,
    ops::{Deref, DerefMut},
};
use std::sync::Weak;

use bytes::BytesMut;

use crate::{error::BufferError, pool::PoolShared};

/// 分段的身份标识：所属池、所在块、块内偏移与长度。
///
/// - 池化分段的 `pool` 为池的进程内编号，非池化分段为 0；
/// - 非池化分段的 `block` 取底层块的起始地址，仅用于调试与去重。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub pool: u64,
    pub block: u64,
    pub offset: usize,
    pub length: usize,
}

/// 池内空闲分段：归还后仅保留内存与位置信息，不再携带句柄语义。
pub(crate) struct FreeSegment {
    pub(crate) data: BytesMut,
    pub(crate) block: u64,
    pub(crate) offset: usize,
}

/// `BufferSegment` 是对某个内存块内 `[offset, offset + length)` 区间的独占视图。
///
/// # 设计动机（Why）
/// - 接收状态与在途写出都需要“独占一段定长内存，用完即还”的语义；
/// - 以所有权代替引用计数复活：归还时句柄被消费，池在下一次租借时签发新句柄，
///   同一区间在任一时刻至多存在一个活跃句柄。
///
/// # 实现策略（How）
/// - 内存取自 `BytesMut::split_to` 切出的块内片段，各片段共享同一分配但互不重叠；
/// - 通过 `Weak<PoolShared>` 指回所属池；池已释放或已关闭时归还退化为直接丢弃；
/// - `Drop` 与显式 [`release`](Self::release) 走同一条归还路径，重复归还在类型层面不可能发生。
///
/// # 契约说明（What）
/// - `len()` 恒等于租借时的分段尺寸，内容在复用之间不会清零；
/// - 相等性与哈希基于 [`SegmentKey`]，不比较内容。
pub struct BufferSegment {
    data: BytesMut,
    key: SegmentKey,
    owner: Option<Weak<PoolShared>>,
}

impl BufferSegment {
    /// 分配一段不属于任何池的零填充内存。
    pub fn detached(length: usize) -> Self {
        let data = BytesMut::zeroed(length);
        let block = data.as_ptr() as u64;
        Self {
            data,
            key: SegmentKey {
                pool: 0,
                block,
                offset: 0,
                length,
            },
            owner: None,
        }
    }

    /// 从调用方提供的块中切出 `[offset, offset + length)` 作为非池化分段。
    ///
    /// # 错误（Errors）
    /// - 区间越界时返回 [`BufferError::InvalidRange`]。
    pub fn from_block(
        mut block: BytesMut,
        offset: usize,
        length: usize,
    ) -> Result<Self, BufferError> {
        let block_len = block.len();
        let end = offset.checked_add(length);
        if end.is_none_or(|end| end > block_len) {
            return Err(BufferError::InvalidRange {
                offset,
                length,
                block_len,
            });
        }
        let base = block.as_ptr() as u64;
        let mut data = block.split_off(offset);
        data.truncate(length);
        Ok(Self {
            data,
            key: SegmentKey {
                pool: 0,
                block: base,
                offset,
                length,
            },
            owner: None,
        })
    }

    pub(crate) fn leased(free: FreeSegment, pool_id: u64, owner: Weak<PoolShared>) -> Self {
        let length = free.data.len();
        Self {
            data: free.data,
            key: SegmentKey {
                pool: pool_id,
                block: free.block,
                offset: free.offset,
                length,
            },
            owner: Some(owner),
        }
    }

    /// 分段长度（字节）。
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为零长度分段。
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 块内偏移。
    pub fn offset(&self) -> usize {
        self.key.offset
    }

    /// 身份标识。
    pub fn key(&self) -> SegmentKey {
        self.key
    }

    /// 是否由缓冲池签发。
    pub fn is_pooled(&self) -> bool {
        self.owner.is_some()
    }

    /// 只读字节视图。
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// 可写字节视图。
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 显式归还；等价于丢弃句柄。
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.key.pool
    }
}

impl Drop for BufferSegment {
    fn drop(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        let Some(pool) = owner.upgrade() else {
            return;
        };
        let data = mem::take(&mut self.data);
        pool.reclaim(FreeSegment {
            data,
            block: self.key.block,
            offset: self.key.offset,
        });
    }
}

impl Deref for BufferSegment {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BufferSegment {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for BufferSegment {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for BufferSegment {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl PartialEq for BufferSegment {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BufferSegment {}

impl Hash for BufferSegment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for BufferSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSegment")
            .field("pool", &self.key.pool)
            .field("block", &self.key.block)
            .field("offset", &self.key.offset)
            .field("length", &self.key.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_block_rejects_out_of_range() {
        let err = BufferSegment::from_block(BytesMut::zeroed(16), 10, 8)
            .expect_err("越界区间应被拒绝");
        assert_eq!(
            err,
            BufferError::InvalidRange {
                offset: 10,
                length: 8,
                block_len: 16
            }
        );

        let overflow = BufferSegment::from_block(BytesMut::zeroed(16), usize::MAX, 2);
        assert!(overflow.is_err(), "偏移溢出同样视为越界");
    }

    #[test]
    fn from_block_views_requested_range() {
        let mut block = BytesMut::zeroed(8);
        block.copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let segment = BufferSegment::from_block(block, 2, 4).expect("合法区间");
        assert_eq!(segment.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(segment.offset(), 2);
        assert!(!segment.is_pooled());
        segment.release();
    }

    #[test]
    fn detached_segment_is_zeroed() {
        let segment = BufferSegment::detached(32);
        assert_eq!(segment.len(), 32);
        assert!(segment.iter().all(|byte| *byte == 0));
        assert_eq!(segment.key().pool, 0);
    }
}
