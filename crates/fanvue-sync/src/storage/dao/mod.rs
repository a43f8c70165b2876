//! 数据访问层 (DAO) - 每张表一个

pub mod transaction_dao;
pub mod watermark_dao;

pub use transaction_dao::TransactionDao;
pub use watermark_dao::WatermarkDao;

use chrono::{DateTime, TimeZone, Utc};

/// 毫秒时间戳 → UTC 时间；越界时取 unix 纪元
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
