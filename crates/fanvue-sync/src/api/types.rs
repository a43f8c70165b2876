//! 变现平台 API 的响应结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::FanUuid;

/// 页码分页
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Pagination {
    #[serde(rename = "hasMore", default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, has_more: bool) -> Self {
        Self {
            data,
            pagination: Pagination { has_more },
        }
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more
    }
}

/// 游标分页
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct CursorPage<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn new(data: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { data, next_cursor }
    }
}

/// 订阅者 / 关注者列表中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanSummary {
    pub uuid: FanUuid,
    #[serde(rename = "isTopSpender", default)]
    pub is_top_spender: bool,
}

impl FanSummary {
    pub fn new(uuid: impl Into<FanUuid>) -> Self {
        Self {
            uuid: uuid.into(),
            is_top_spender: false,
        }
    }
}

/// 单个粉丝的洞察（只取累计消费）
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FanInsights {
    #[serde(default)]
    pub spending: SpendingInsights,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpendingInsights {
    #[serde(default)]
    pub total: MoneyTotal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MoneyTotal {
    /// 最小货币单位
    #[serde(default)]
    pub gross: i64,
}

impl FanInsights {
    pub fn with_lifetime_spend(cents: i64) -> Self {
        Self {
            spending: SpendingInsights {
                total: MoneyTotal { gross: cents },
            },
        }
    }

    pub fn lifetime_spend_cents(&self) -> i64 {
        self.spending.total.gross
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub uuid: FanUuid,
}

/// 收入账本中的一条记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningItem {
    #[serde(default, alias = "uuid")]
    pub id: Option<String>,
    #[serde(rename = "postUuid", default)]
    pub post_uuid: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub sender: Option<UserRef>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// 最小货币单位
    #[serde(default)]
    pub gross: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
}

impl EarningItem {
    /// 付款人：`user` 优先，其次 `sender`
    pub fn buyer(&self) -> Option<&FanUuid> {
        self.user.as_ref().or(self.sender.as_ref()).map(|u| &u.uuid)
    }
}

/// 列表成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMember {
    pub uuid: FanUuid,
}

/// 收入账本查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarningsQuery {
    /// 起始时间（含）
    pub start_date: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
}
