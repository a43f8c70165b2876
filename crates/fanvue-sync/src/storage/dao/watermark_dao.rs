//! 水位 DAO - ledger_watermark 单行表

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::dao::from_millis;
use crate::storage::entities::Watermark;

pub struct WatermarkDao<'a> {
    conn: &'a Connection,
}

impl<'a> WatermarkDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self) -> Result<Option<Watermark>> {
        let watermark = self
            .conn
            .query_row(
                "SELECT occurred_at, remote_id FROM ledger_watermark WHERE id = 1",
                [],
                |row| {
                    Ok(Watermark {
                        occurred_at: from_millis(row.get(0)?),
                        remote_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(watermark)
    }

    pub fn set(&self, watermark: &Watermark, updated_at: i64) -> Result<()> {
        let sql = r#"
            INSERT INTO ledger_watermark (id, occurred_at, remote_id, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                occurred_at = excluded.occurred_at,
                remote_id = excluded.remote_id,
                updated_at = excluded.updated_at
        "#;
        self.conn.execute(
            sql,
            params![watermark.occurred_at.timestamp_millis(), watermark.remote_id, updated_at],
        )?;
        Ok(())
    }
}
