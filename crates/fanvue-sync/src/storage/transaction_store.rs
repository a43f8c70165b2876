//! 交易缓存 - 远端收入账本的只追加本地副本
//!
//! 解锁规则直接查询本地缓存，而不是每个周期重新扫描远端账本。
//! 所有写入经由同一个 `tokio::sync::Mutex<Connection>` 串行化（单写者）；
//! 一页记录与推进后的水位在同一个 SQLite 事务中提交。

use std::collections::HashSet;
use std::path::Path;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::model::FanUuid;
use crate::storage::dao::{TransactionDao, WatermarkDao};
use crate::storage::entities::{TransactionRecord, Watermark};
use crate::storage::migrate::init_db;

pub struct TransactionStore {
    conn: Mutex<Connection>,
}

impl TransactionStore {
    /// 打开（必要时创建）数据库文件并执行迁移
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)
            .map_err(|e| SyncError::Database(format!("打开交易缓存失败 {}: {}", path.display(), e)))?;
        init_db(&mut conn)?;
        info!("✅ 交易缓存已打开: {}", path.display());
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        init_db(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// 插入一条记录；remote_id 已存在时返回 false
    pub async fn record_if_new(&self, record: &TransactionRecord) -> Result<bool> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).insert_if_new(record, now_millis())
    }

    pub async fn has_unlocked(&self, buyer: &FanUuid, content_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).has_unlocked(buyer, content_id)
    }

    /// 由已入库记录重新计算的累计消费
    pub async fn total_spend_cents(&self, buyer: &FanUuid) -> Result<i64> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).total_spend(buyer)
    }

    pub async fn high_watermark(&self) -> Result<Option<Watermark>> {
        let conn = self.conn.lock().await;
        WatermarkDao::new(&conn).get()
    }

    /// 在一个事务内写入一页记录，并可选地推进水位
    ///
    /// 水位只前进：新水位不大于已存水位时（另一轮同步已走得更远）保留已存水位，
    /// 记录照常写入。返回新插入的条数。
    pub async fn ingest_page(&self, records: &[TransactionRecord], watermark: Option<&Watermark>) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = now_millis();

        let mut inserted = 0;
        {
            let dao = TransactionDao::new(&tx);
            for record in records {
                if dao.insert_if_new(record, now)? {
                    inserted += 1;
                }
            }
        }

        if let Some(next) = watermark {
            let dao = WatermarkDao::new(&tx);
            match dao.get()? {
                Some(current) if *next <= current => {
                    if *next < current {
                        debug!("水位 {} 落后于已存水位 {}，保留已存水位", next, current);
                    }
                }
                _ => dao.set(next, now)?,
            }
        }

        tx.commit()?;
        debug!("入库 {} 条新记录 (本页 {} 条)", inserted, records.len());
        Ok(inserted)
    }

    /// 解锁过某内容的全部买家
    pub async fn unlockers(&self, content_id: &str) -> Result<HashSet<FanUuid>> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).unlockers(content_id)
    }

    pub async fn unlocked_content(&self, buyer: &FanUuid) -> Result<HashSet<String>> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).unlocked_content(buyer)
    }

    pub async fn transaction_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        TransactionDao::new(&conn).count()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn record(id: &str, buyer: &str, content: &str, minute: i64) -> TransactionRecord {
        TransactionRecord {
            remote_id: id.to_string(),
            buyer: buyer.into(),
            content_id: content.to_string(),
            amount_cents: 500,
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    #[tokio::test]
    async fn record_if_new_is_idempotent() {
        let store = TransactionStore::open_in_memory().unwrap();
        let tx = record("tx-1", "fan-1", "post-1", 0);
        assert!(store.record_if_new(&tx).await.unwrap());
        assert!(!store.record_if_new(&tx).await.unwrap());
        assert_eq!(store.transaction_count().await.unwrap(), 1);
        assert_eq!(store.total_spend_cents(&"fan-1".into()).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn unlock_queries() {
        let store = TransactionStore::open_in_memory().unwrap();
        store
            .ingest_page(
                &[
                    record("tx-1", "fan-1", "post-1", 0),
                    record("tx-2", "fan-2", "post-1", 1),
                    record("tx-3", "fan-1", "post-2", 2),
                ],
                None,
            )
            .await
            .unwrap();

        assert!(store.has_unlocked(&"fan-1".into(), "post-2").await.unwrap());
        assert!(!store.has_unlocked(&"fan-2".into(), "post-2").await.unwrap());
        assert_eq!(store.unlockers("post-1").await.unwrap().len(), 2);
        let content = store.unlocked_content(&"fan-1".into()).await.unwrap();
        assert!(content.contains("post-1") && content.contains("post-2"));
    }

    #[tokio::test]
    async fn watermark_advances_with_page_and_never_regresses() {
        let store = TransactionStore::open_in_memory().unwrap();
        assert_eq!(store.high_watermark().await.unwrap(), None);

        let page = [record("tx-1", "fan-1", "post-1", 0), record("tx-2", "fan-1", "post-1", 5)];
        let mark = page[1].watermark();
        assert_eq!(store.ingest_page(&page, Some(&mark)).await.unwrap(), 2);
        assert_eq!(store.high_watermark().await.unwrap(), Some(mark.clone()));

        // 同一水位重放：幂等
        assert_eq!(store.ingest_page(&page, Some(&mark)).await.unwrap(), 0);

        // 落后的一轮同步：记录入库，水位保持最大值
        let older = record("tx-0", "fan-9", "post-9", -10);
        assert_eq!(store.ingest_page(&[older.clone()], Some(&older.watermark())).await.unwrap(), 1);
        assert!(store.has_unlocked(&"fan-9".into(), "post-9").await.unwrap());
        assert_eq!(store.high_watermark().await.unwrap(), Some(mark));
    }

    #[tokio::test]
    async fn unlocks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transactions.db");
        {
            let store = TransactionStore::open(&path).unwrap();
            store.record_if_new(&record("tx-1", "fan-1", "post-1", 0)).await.unwrap();
        }
        let store = TransactionStore::open(&path).unwrap();
        assert!(store.has_unlocked(&"fan-1".into(), "post-1").await.unwrap());
    }
}
