//! 交易缓存实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::FanUuid;

/// 一条已入库的购买 / 解锁记录；入库后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// 远端交易 ID（唯一）
    pub remote_id: String,
    pub buyer: FanUuid,
    /// 被购买的内容（帖子 UUID）
    pub content_id: String,
    /// 最小货币单位
    pub amount_cents: i64,
    pub occurred_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn watermark(&self) -> Watermark {
        Watermark {
            occurred_at: self.occurred_at,
            remote_id: self.remote_id.clone(),
        }
    }
}

/// 已同步到的最新账本位置，按 (occurred_at, remote_id) 全序
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub occurred_at: DateTime<Utc>,
    pub remote_id: String,
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.occurred_at.to_rfc3339(), self.remote_id)
    }
}
