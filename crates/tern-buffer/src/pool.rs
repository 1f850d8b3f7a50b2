use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use parking_lot::Mutex as BlockLock;
use spin::Mutex;
use tern_core::config::BufferPoolConfig;
use tracing::{debug, warn};

use crate::{
    error::BufferError,
    segment::{BufferSegment, FreeSegment},
};

/// 进程内池编号，0 保留给非池化分段。
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// `BufferPool` 提供固定尺寸分段的租借与归还。
///
/// # 模块角色（Why）
/// - 作为接收缓冲与出站帧的统一内存来源，把分配成本集中到扩容时刻；
/// - 池耗尽以显式错误呈现，调用方据此施加背压或丢弃工作，不会静默阻塞。
///
/// # 核心机制（How）
/// - 自由链表为 `spin::Mutex<Vec<FreeSegment>>`，租借与归还仅在入栈/出栈时短暂持锁；
/// - 扩容由独立的块锁保护，持锁后再次尝试出栈（双重检查），避免竞争线程重复扩容；
/// - 一个块一次性切出 `initial_segment_count` 个分段；若 `count * size` 不足
///   [`Self::MIN_BLOCK_SIZE`]，构造时自动上调分段数量；
/// - 出栈失败且不允许扩容（或扩容后仍被抢走）时计一次尝试，超过 `max_try_count` 返回
///   [`BufferError::Exhausted`]。
///
/// # 契约说明（What）
/// - **线程安全**：`acquire`/`release` 可在任意线程并发调用；
/// - **不变量**：`available + in_use == total_segment_count()`，池关闭前恒成立；
/// - **关闭语义**：[`close`](Self::close) 之后租借失败，归还的分段直接丢弃。
///
/// # 设计权衡（Trade-offs）
/// - 自由链表沿用自旋锁：临界区只有一次 `push`/`pop`，比阻塞锁更轻；
/// - 已创建的块不会回收，峰值内存在池生命周期内保持驻留。
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// 单个块的最小字节数，避免极小块导致频繁扩容。
    pub const MIN_BLOCK_SIZE: usize = 85 * 1024;

    /// 构造缓冲池并立即分配首个块。
    ///
    /// # 错误（Errors）
    /// - `segment_size` 或 `segment_count` 为 0 时返回 [`BufferError::InvalidConfig`]。
    pub fn new(
        segment_size: usize,
        segment_count: usize,
        allow_expand: bool,
    ) -> Result<Self, BufferError> {
        if segment_size == 0 {
            return Err(BufferError::InvalidConfig("segment size must be positive"));
        }
        if segment_count == 0 {
            return Err(BufferError::InvalidConfig("segment count must be positive"));
        }

        let mut initial_segment_count = segment_count;
        if segment_size.saturating_mul(segment_count) < Self::MIN_BLOCK_SIZE {
            initial_segment_count = Self::MIN_BLOCK_SIZE / segment_size + 1;
        }

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            segment_size,
            initial_segment_count,
            allow_expand,
            max_try_count: AtomicUsize::new(BufferPoolConfig::DEFAULT_MAX_TRY_COUNT),
            free_list: Mutex::new(Vec::with_capacity(initial_segment_count)),
            blocks: BlockLock::new(0),
            block_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            metrics: PoolMetrics::default(),
        });
        {
            let mut blocks = shared.blocks.lock();
            shared.create_block(&mut blocks);
        }
        Ok(Self { shared })
    }

    /// 按配置节构造。
    pub fn from_config(config: &BufferPoolConfig) -> Result<Self, BufferError> {
        let pool = Self::new(
            config.segment_size,
            config.segment_count,
            config.allow_expand,
        )?;
        pool.set_max_try_count(config.max_try_count);
        Ok(pool)
    }

    /// 租借一个分段。
    ///
    /// # 执行步骤（How）
    /// 1. 尝试从自由链表出栈；
    /// 2. 允许扩容时获取块锁，再次出栈失败则创建新块；
    /// 3. 累计尝试次数，超过 `max_try_count` 后返回 [`BufferError::Exhausted`]。
    pub fn acquire(&self) -> Result<BufferSegment, BufferError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(BufferError::PoolClosed);
        }

        let max_try_count = shared.max_try_count.load(Ordering::Relaxed);
        let mut attempts = 0usize;
        loop {
            if let Some(free) = shared.pop_free() {
                return Ok(self.lease(free));
            }

            if shared.allow_expand {
                let mut blocks = shared.blocks.lock();
                if let Some(free) = shared.pop_free() {
                    return Ok(self.lease(free));
                }
                shared.create_block(&mut blocks);
            }

            attempts += 1;
            if attempts > max_try_count {
                shared
                    .metrics
                    .failed_acquisitions
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    pool = shared.id,
                    segment_size = shared.segment_size,
                    attempts,
                    "buffer pool exhausted"
                );
                return Err(BufferError::Exhausted {
                    segment_size: shared.segment_size,
                    attempts,
                });
            }
            core::hint::spin_loop();
        }
    }

    /// 租借一个至少 `min_size` 字节的分段。
    pub fn acquire_at_least(&self, min_size: usize) -> Result<BufferSegment, BufferError> {
        if min_size > self.shared.segment_size {
            return Err(BufferError::TooSmall {
                requested: min_size,
                segment_size: self.shared.segment_size,
            });
        }
        self.acquire()
    }

    /// 归还分段。
    ///
    /// # 契约说明（What）
    /// - 分段必须由本池签发，否则返回 [`BufferError::ForeignSegment`]；
    ///   此时分段仍按其自身归属被回收（或丢弃），不会进入本池；
    /// - 池已关闭时静默丢弃。
    pub fn release(&self, segment: BufferSegment) -> Result<(), BufferError> {
        if !self.owns(&segment) {
            return Err(BufferError::ForeignSegment);
        }
        segment.release();
        Ok(())
    }

    /// 判断分段是否由本池签发。
    pub fn owns(&self, segment: &BufferSegment) -> bool {
        segment.is_pooled() && segment.pool_id() == self.shared.id
    }

    /// 两个句柄是否指向同一个池。
    pub fn same_pool(&self, other: &BufferPool) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// 关闭池：后续租借失败，归还的分段直接丢弃。
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.free_list.lock().clear();
            debug!(pool = self.shared.id, "buffer pool closed");
        }
    }

    /// 池是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// 分段尺寸。
    pub fn segment_size(&self) -> usize {
        self.shared.segment_size
    }

    /// 每个块包含的分段数（可能已按最小块尺寸上调）。
    pub fn initial_segment_count(&self) -> usize {
        self.shared.initial_segment_count
    }

    /// 是否允许扩容。
    pub fn allow_expand(&self) -> bool {
        self.shared.allow_expand
    }

    /// 单次租借的最大重试次数。
    pub fn max_try_count(&self) -> usize {
        self.shared.max_try_count.load(Ordering::Relaxed)
    }

    /// 调整单次租借的最大重试次数。
    pub fn set_max_try_count(&self, value: usize) {
        self.shared.max_try_count.store(value, Ordering::Relaxed);
    }

    /// 自由链表中的分段数量。
    pub fn available_segment_count(&self) -> usize {
        self.shared.free_list.lock().len()
    }

    /// 已创建的块数量。
    pub fn block_count(&self) -> usize {
        self.shared.block_count.load(Ordering::Acquire)
    }

    /// 已创建的分段总数：`block_count * initial_segment_count`。
    pub fn total_segment_count(&self) -> usize {
        self.block_count() * self.shared.initial_segment_count
    }

    /// 已分配的内存总量（字节）。
    pub fn total_allocated_memory(&self) -> usize {
        self.total_segment_count() * self.shared.segment_size
    }

    /// 统计快照。
    pub fn statistics(&self) -> PoolStats {
        let metrics = &self.shared.metrics;
        PoolStats {
            segment_size: self.shared.segment_size,
            block_count: self.block_count(),
            total_segments: self.total_segment_count(),
            available_segments: self.available_segment_count(),
            in_use: metrics.in_use.load(Ordering::Relaxed),
            leases: metrics.leases.load(Ordering::Relaxed),
            failed_acquisitions: metrics.failed_acquisitions.load(Ordering::Relaxed),
        }
    }

    fn lease(&self, free: FreeSegment) -> BufferSegment {
        let metrics = &self.shared.metrics;
        metrics.in_use.fetch_add(1, Ordering::Relaxed);
        metrics.leases.fetch_add(1, Ordering::Relaxed);
        BufferSegment::leased(free, self.shared.id, Arc::downgrade(&self.shared))
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("segment_size", &self.shared.segment_size)
            .field("initial_segment_count", &self.shared.initial_segment_count)
            .field("allow_expand", &self.shared.allow_expand)
            .field("block_count", &self.block_count())
            .finish()
    }
}

/// 缓冲池的统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub segment_size: usize,
    pub block_count: usize,
    pub total_segments: usize,
    pub available_segments: usize,
    /// 当前被持有的分段数量。
    pub in_use: usize,
    /// 累计租借次数。
    pub leases: u64,
    /// 累计因耗尽而失败的租借次数。
    pub failed_acquisitions: u64,
}

pub(crate) struct PoolShared {
    id: u64,
    segment_size: usize,
    initial_segment_count: usize,
    allow_expand: bool,
    max_try_count: AtomicUsize,
    free_list: Mutex<Vec<FreeSegment>>,
    blocks: BlockLock<u64>,
    block_count: AtomicUsize,
    closed: AtomicBool,
    metrics: PoolMetrics,
}

impl PoolShared {
    fn pop_free(&self) -> Option<FreeSegment> {
        self.free_list.lock().pop()
    }

    /// 在持有块锁的前提下创建新块并把全部分段压入自由链表。
    fn create_block(&self, blocks: &mut u64) {
        let block_id = *blocks;
        let block_size = self.initial_segment_count * self.segment_size;
        let mut block = BytesMut::zeroed(block_size);
        let mut fresh = Vec::with_capacity(self.initial_segment_count);
        for index in 0..self.initial_segment_count {
            fresh.push(FreeSegment {
                data: block.split_to(self.segment_size),
                block: block_id,
                offset: index * self.segment_size,
            });
        }
        *blocks += 1;
        self.free_list.lock().extend(fresh);
        self.block_count.fetch_add(1, Ordering::AcqRel);
        debug!(
            pool = self.id,
            block = block_id,
            segment_size = self.segment_size,
            segments = self.initial_segment_count,
            "buffer pool grew by one block"
        );
    }

    /// 分段句柄被丢弃时的归还入口。
    pub(crate) fn reclaim(&self, free: FreeSegment) {
        saturating_decrement(&self.metrics.in_use);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.free_list.lock().push(free);
    }
}

#[derive(Default)]
struct PoolMetrics {
    in_use: AtomicUsize,
    leases: AtomicU64,
    failed_acquisitions: AtomicU64,
}

fn saturating_decrement(target: &AtomicUsize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(1))
    });
}
