//! 交易 DAO - ledger_transaction 表（只追加）

use std::collections::HashSet;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::model::FanUuid;
use crate::storage::entities::TransactionRecord;

pub struct TransactionDao<'a> {
    conn: &'a Connection,
}

impl<'a> TransactionDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入；remote_id 已存在时忽略并返回 false
    pub fn insert_if_new(&self, record: &TransactionRecord, recorded_at: i64) -> Result<bool> {
        let sql = r#"
            INSERT OR IGNORE INTO ledger_transaction
                (remote_id, buyer_uuid, content_id, amount_cents, occurred_at, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#;
        let changed = self.conn.execute(
            sql,
            params![
                record.remote_id,
                record.buyer.as_str(),
                record.content_id,
                record.amount_cents,
                record.occurred_at.timestamp_millis(),
                recorded_at
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn has_unlocked(&self, buyer: &FanUuid, content_id: &str) -> Result<bool> {
        let found: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM ledger_transaction WHERE buyer_uuid = ?1 AND content_id = ?2)",
            params![buyer.as_str(), content_id],
            |r| r.get(0),
        )?;
        Ok(found)
    }

    pub fn total_spend(&self, buyer: &FanUuid) -> Result<i64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_transaction WHERE buyer_uuid = ?1",
            params![buyer.as_str()],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    pub fn unlockers(&self, content_id: &str) -> Result<HashSet<FanUuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT buyer_uuid FROM ledger_transaction WHERE content_id = ?1")?;
        let rows = stmt.query_map(params![content_id], |row| row.get::<_, String>(0))?;
        let mut buyers = HashSet::new();
        for buyer in rows {
            buyers.insert(FanUuid::new(buyer?));
        }
        Ok(buyers)
    }

    pub fn unlocked_content(&self, buyer: &FanUuid) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT content_id FROM ledger_transaction WHERE buyer_uuid = ?1")?;
        let rows = stmt.query_map(params![buyer.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM ledger_transaction", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}
