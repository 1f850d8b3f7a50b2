use std::sync::Arc;

use parking_lot::RwLock;
use tern_core::config::BuffersConfig;

use crate::{BufferError, BufferPool, BufferSegment};

/// `BufferPoolManager` 按分段尺寸升序管理多个 [`BufferPool`]。
///
/// # 设计动机（Why）
/// - 接收路径平时使用推荐尺寸的缓冲，遇到超大帧时需要临时换到更大的分段；
/// - 由管理器集中做“最小可用池”选择，连接只需声明所需字节数。
///
/// # 契约说明（What）
/// - 池列表始终按 `segment_size` 升序排列，尺寸相同的池按加入顺序排列；
/// - [`acquire`](Self::acquire) 取自分段最大的池；没有任何池时返回 [`BufferError::NoSuitablePool`]；
/// - [`acquire_at_least`](Self::acquire_at_least) 取自第一个满足尺寸的池。
///
/// # 风险与考量（Trade-offs）
/// - 列表以 `RwLock` 保护，租借只持读锁；增删池属于启动期操作，写锁竞争可以忽略。
#[derive(Clone, Debug, Default)]
pub struct BufferPoolManager {
    pools: Arc<RwLock<Vec<BufferPool>>>,
}

impl BufferPoolManager {
    /// 创建空管理器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定池列表构造。
    pub fn with_pools(pools: impl IntoIterator<Item = BufferPool>) -> Self {
        let manager = Self::new();
        for pool in pools {
            manager.add_pool(pool);
        }
        manager
    }

    /// 按配置节逐个构造池。
    pub fn from_config(config: &BuffersConfig) -> Result<Self, BufferError> {
        let pools = config
            .pools
            .iter()
            .map(BufferPool::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_pools(pools))
    }

    /// 加入一个池，保持升序。
    pub fn add_pool(&self, pool: BufferPool) {
        let mut pools = self.pools.write();
        let index = pools.partition_point(|existing| existing.segment_size() <= pool.segment_size());
        pools.insert(index, pool);
    }

    /// 移除与给定句柄指向同一个池的条目；未找到时返回 `false`。
    pub fn remove_pool(&self, pool: &BufferPool) -> bool {
        let mut pools = self.pools.write();
        let before = pools.len();
        pools.retain(|existing| !existing.same_pool(pool));
        pools.len() != before
    }

    /// 当前池列表的快照。
    pub fn pools(&self) -> Vec<BufferPool> {
        self.pools.read().clone()
    }

    /// 池数量。
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// 是否没有任何池。
    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// 从分段最大的池租借。
    pub fn acquire(&self) -> Result<BufferSegment, BufferError> {
        let pool = self
            .pools
            .read()
            .last()
            .cloned()
            .ok_or(BufferError::NoSuitablePool { requested: 0 })?;
        pool.acquire()
    }

    /// 从第一个分段尺寸不小于 `min_size` 的池租借。
    pub fn acquire_at_least(&self, min_size: usize) -> Result<BufferSegment, BufferError> {
        let pool = self
            .pools
            .read()
            .iter()
            .find(|pool| pool.segment_size() >= min_size)
            .cloned()
            .ok_or(BufferError::NoSuitablePool {
                requested: min_size,
            })?;
        pool.acquire()
    }

    /// 所有池中最大的分段尺寸。
    pub fn max_segment_size(&self) -> Option<usize> {
        self.pools.read().last().map(BufferPool::segment_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(manager: &BufferPoolManager) -> Vec<usize> {
        manager
            .pools()
            .iter()
            .map(BufferPool::segment_size)
            .collect()
    }

    #[test]
    fn pools_stay_sorted_by_segment_size() {
        let manager = BufferPoolManager::new();
        manager.add_pool(BufferPool::new(4096, 4, true).expect("构造缓冲池失败"));
        manager.add_pool(BufferPool::new(512, 4, true).expect("构造缓冲池失败"));
        manager.add_pool(BufferPool::new(65536, 2, true).expect("构造缓冲池失败"));
        assert_eq!(sizes(&manager), vec![512, 4096, 65536]);
    }

    #[test]
    fn acquire_at_least_picks_smallest_fit() {
        let manager = BufferPoolManager::with_pools([
            BufferPool::new(512, 4, true).expect("构造缓冲池失败"),
            BufferPool::new(4096, 4, true).expect("构造缓冲池失败"),
        ]);
        assert_eq!(manager.acquire_at_least(100).expect("应命中小池").len(), 512);
        assert_eq!(manager.acquire_at_least(512).expect("边界尺寸应命中小池").len(), 512);
        assert_eq!(manager.acquire_at_least(513).expect("应命中大池").len(), 4096);
        assert_eq!(
            manager.acquire_at_least(4097).expect_err("超出所有池"),
            BufferError::NoSuitablePool { requested: 4097 }
        );
    }

    #[test]
    fn plain_acquire_uses_largest_pool() {
        let manager = BufferPoolManager::with_pools([
            BufferPool::new(8192, 4, true).expect("构造缓冲池失败"),
            BufferPool::new(1024, 4, true).expect("构造缓冲池失败"),
        ]);
        assert_eq!(manager.acquire().expect("应能租借").len(), 8192);
    }

    #[test]
    fn empty_manager_has_no_suitable_pool() {
        let manager = BufferPoolManager::new();
        assert!(matches!(
            manager.acquire(),
            Err(BufferError::NoSuitablePool { .. })
        ));
    }

    #[test]
    fn remove_pool_drops_only_target() {
        let small = BufferPool::new(1024, 4, true).expect("构造缓冲池失败");
        let large = BufferPool::new(8192, 4, true).expect("构造缓冲池失败");
        let manager = BufferPoolManager::with_pools([small.clone(), large]);
        assert!(manager.remove_pool(&small));
        assert!(!manager.remove_pool(&small), "重复移除应返回 false");
        assert_eq!(sizes(&manager), vec![8192]);
    }

    #[test]
    fn from_config_builds_default_pools() {
        let manager =
            BufferPoolManager::from_config(&BuffersConfig::default()).expect("默认配置应合法");
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.max_segment_size(), Some(65536));
    }
}
