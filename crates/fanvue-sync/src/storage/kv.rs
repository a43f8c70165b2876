//! KV 存储模块 - 基于 sled 的同步状态存储
//!
//! 值以 JSON 编码；每个用途一个命名空间（sled Tree）。
//! 这里的数据只是优化信息，丢失后下一个周期会完整重算。

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use tracing::debug;

use crate::error::{Result, SyncError};

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Db,
}

impl KvStore {
    /// 打开目录；上一个进程刚释放锁时带退避重试
    pub async fn open(path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SyncError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 200;
        let mut attempt = 0;
        loop {
            match sled::open(path) {
                Ok(db) => return Ok(Self { db }),
                Err(e) => {
                    let msg = e.to_string();
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    attempt += 1;
                    if !is_lock || attempt >= MAX_OPEN_RETRIES {
                        return Err(SyncError::KvStore(format!("打开 sled 数据库失败: {}", e)));
                    }
                    let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                    debug!("sled 被占用，{}ms 后重试", delay_ms);
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// 临时存储（关闭即删除）
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// 命名空间
    pub fn namespace(&self, name: &str) -> Result<KvNamespace> {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| SyncError::KvStore(format!("打开 Tree {} 失败: {}", name, e)))?;
        Ok(KvNamespace { tree })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// 一个命名空间内的 JSON 键值
#[derive(Debug, Clone)]
pub struct KvNamespace {
    tree: Tree,
}

impl KvNamespace {
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        match self.tree.get(key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| SyncError::Serialization(format!("反序列化值失败 ({}): {}", key, e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn set<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| SyncError::Serialization(format!("序列化值失败 ({}): {}", key, e)))?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.tree.remove(key)?.is_some())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }
}
