use parking_lot::Mutex;
use tern_codec::OutboundPacket;

use crate::{Connection, ConnectionError, ConnectionPool, PoolError};

/// 粘性优先连接：持续使用同一条连接，它关闭后才从池中换一条。
///
/// 适合需要会话亲和但又希望在断线后自动切换的客户端。
pub struct PrioritizedConnection {
    preferred: Mutex<Option<Connection>>,
    pool: ConnectionPool,
}

impl PrioritizedConnection {
    /// 以池构造，首选连接在第一次使用时从池中取得。
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            preferred: Mutex::new(None),
            pool,
        }
    }

    /// 以指定的首选连接构造。
    pub fn with_preferred(preferred: Connection, pool: ConnectionPool) -> Self {
        Self {
            preferred: Mutex::new(Some(preferred)),
            pool,
        }
    }

    /// 当前生效的连接：首选连接仍打开则返回它，否则从池中轮询一条并设为新的首选。
    pub fn current(&self) -> Result<Connection, PoolError> {
        let mut preferred = self.preferred.lock();
        if let Some(connection) = preferred.as_ref().filter(|connection| connection.is_open()) {
            return Ok(connection.clone());
        }
        let replacement = self.pool.request()?;
        *preferred = Some(replacement.clone());
        Ok(replacement)
    }

    /// 底层池。
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// 池中是否还有连接。
    pub fn is_open(&self) -> bool {
        self.pool.is_open()
    }

    /// 经当前连接发送并等待写出。
    pub async fn send(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let connection = self.current().map_err(|_| ConnectionError::Closed)?;
        connection.send(packet).await
    }

    /// 经当前连接入队发送。
    pub fn post(&self, packet: OutboundPacket) -> Result<(), ConnectionError> {
        let connection = self.current().map_err(|_| ConnectionError::Closed)?;
        connection.post(packet)
    }

    /// 关闭整个池。
    pub fn close(&self) {
        self.preferred.lock().take();
        self.pool.close();
    }
}
