//! `tern-buffer` 提供固定尺寸分段的池化内存。
//!
//! # 模块定位（Why）
//! - 接收缓冲与出站帧都需要频繁申请定长内存，逐次堆分配会在高连接数下放大抖动；
//! - 将大块内存（block）切分为等长分段（segment）反复租借，可把分配成本摊到扩容时刻。
//!
//! # 设计概要（How）
//! - [`BufferSegment`]：对块内区间的独占视图，持有指回所属池的弱引用，`Drop` 时自动归还；
//! - [`BufferPool`]：自由链表 + 受锁保护的扩容路径，重试上限防止竞争下无界增长；
//! - [`BufferPoolManager`]：按分段尺寸升序管理多个池，为“至少 N 字节”的请求选出最小可用池；
//! - [`BufferStream`]：分段之上的可增长游标，长度不超过分段容量。
//!
//! # 所有权约定（Consistency）
//! - 分段在任一时刻只被一个持有者拥有：接收状态、在途写出或调用方；
//! - 归还即转移所有权：分段句柄被消费，池在下次租借时签发新的句柄。

mod error;
mod manager;
mod pool;
mod segment;
mod stream;

pub use error::BufferError;
pub use manager::BufferPoolManager;
pub use pool::{BufferPool, PoolStats};
pub use segment::{BufferSegment, SegmentKey};
pub use stream::BufferStream;
