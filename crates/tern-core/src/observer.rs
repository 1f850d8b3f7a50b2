use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

/// 观察者订阅句柄，用于取消订阅。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// `Observers` 是带显式投递顺序的观察者列表。
///
/// # 设计动机（Why）
/// - 连接的 `Closed`、监听器的 `Accepted` 等事件需要多个订阅方，
///   且订阅方自身可能在回调里继续订阅或取消订阅；
/// - 生命周期开始类事件按插入序投递，拆除类事件按逆插入序投递，
///   让后订阅者（通常依赖先订阅者）先完成清理。
///
/// # 实现策略（How）
/// - 列表由 `parking_lot::Mutex` 保护，仅在增删与快照时持锁；
/// - 投递前先克隆 `Arc` 快照再释放锁，回调中重入 `subscribe`/`unsubscribe` 不会死锁。
///
/// # 契约说明（What）
/// - 回调期间新增的订阅者不会收到本次事件；
/// - 回调期间被取消的订阅者仍可能收到本次事件（快照已生成）。
pub struct Observers<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ObserverId, Arc<F>)>>,
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> Observers<F> {
    /// 创建空列表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加订阅者并返回句柄。
    pub fn subscribe(&self, observer: Arc<F>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, observer));
        id
    }

    /// 取消订阅；句柄不存在时返回 `false`。
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// 当前订阅者数量。
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 是否没有订阅者。
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 移除全部订阅者。
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// 以插入序返回订阅者快照。
    pub fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// 按插入序投递。
    pub fn notify(&self, mut deliver: impl FnMut(&F)) {
        for observer in self.snapshot() {
            deliver(&observer);
        }
    }

    /// 按逆插入序投递。
    pub fn notify_reverse(&self, mut deliver: impl FnMut(&F)) {
        for observer in self.snapshot().into_iter().rev() {
            deliver(&observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Listener = dyn Fn(&mut Vec<u32>) + Send + Sync;

    #[test]
    fn delivery_order_is_explicit() {
        let observers: Observers<Listener> = Observers::new();
        observers.subscribe(Arc::new(|log: &mut Vec<u32>| log.push(1)));
        observers.subscribe(Arc::new(|log: &mut Vec<u32>| log.push(2)));
        observers.subscribe(Arc::new(|log: &mut Vec<u32>| log.push(3)));

        let mut forward = Vec::new();
        observers.notify(|observer| observer(&mut forward));
        assert_eq!(forward, vec![1, 2, 3]);

        let mut backward = Vec::new();
        observers.notify_reverse(|observer| observer(&mut backward));
        assert_eq!(backward, vec![3, 2, 1]);
    }

    #[test]
    fn unsubscribe_removes_only_target() {
        let observers: Observers<Listener> = Observers::new();
        let first = observers.subscribe(Arc::new(|log: &mut Vec<u32>| log.push(1)));
        observers.subscribe(Arc::new(|log: &mut Vec<u32>| log.push(2)));

        assert!(observers.unsubscribe(first));
        assert!(!observers.unsubscribe(first), "重复取消应返回 false");
        assert_eq!(observers.len(), 1);

        let mut log = Vec::new();
        observers.notify(|observer| observer(&mut log));
        assert_eq!(log, vec![2]);
    }

    #[test]
    fn reentrant_subscribe_does_not_deadlock() {
        let observers: Arc<Observers<dyn Fn() + Send + Sync>> = Arc::new(Observers::new());
        let inner = Arc::clone(&observers);
        observers.subscribe(Arc::new(move || {
            inner.subscribe(Arc::new(|| {}));
        }));
        observers.notify(|observer| observer());
        assert_eq!(observers.len(), 2);
    }
}
