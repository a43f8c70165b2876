//! 账本增量同步 - 远端收入账本 → 本地交易缓存
//!
//! 从已存水位（含）开始分页拉取，转换后幂等入库：
//!
//! - `OldestFirst`：每页记录与该页推进后的水位同一事务提交
//! - `NewestFirst`：各页记录到达即入库，水位在整轮扫描结束后才提交；
//!   中途失败时水位不动，下次从旧水位重扫，不会漏掉更早的记录
//!
//! 已有水位而远端一条不早于它的记录都没有返回时，说明远端已不再报告
//! 我们上次入库的内容，返回 `StoreInconsistency`。

use std::sync::Arc;

use chrono::SubsecRound;
use futures::TryStreamExt;
use tracing::{debug, error, info, warn};

use crate::api::{earning_pages, EarningItem, EarningsQuery, MonetizationApi};
use crate::config::{LedgerConfig, LedgerOrder};
use crate::error::{Result, SyncError};
use crate::storage::{TransactionRecord, TransactionStore, Watermark};

/// 一次账本同步的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSyncReport {
    pub pages: usize,
    pub seen: usize,
    pub inserted: usize,
    /// 缺少帖子、买家或时间而跳过的条目
    pub skipped: usize,
    pub watermark: Option<Watermark>,
}

pub struct LedgerSync {
    api: Arc<dyn MonetizationApi>,
    store: Arc<TransactionStore>,
    config: LedgerConfig,
}

impl LedgerSync {
    pub fn new(api: Arc<dyn MonetizationApi>, store: Arc<TransactionStore>, config: LedgerConfig) -> Self {
        Self { api, store, config }
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    pub async fn run(&self) -> Result<LedgerSyncReport> {
        let previous = self.store.high_watermark().await?;
        info!(
            "💰 开始同步收入账本: since={}, order={:?}",
            previous.as_ref().map(|w| w.to_string()).unwrap_or_else(|| "start".to_string()),
            self.config.order
        );

        let query = EarningsQuery {
            start_date: previous.as_ref().map(|w| w.occurred_at),
            sources: self.config.sources.clone(),
        };
        let mut pages = earning_pages(self.api.as_ref(), &query);

        let mut report = LedgerSyncReport::default();
        let mut reached_previous = previous.is_none();
        let mut max_seen = previous.clone();

        while let Some(items) = pages.try_next().await? {
            report.pages += 1;
            report.seen += items.len();

            let mut records = Vec::with_capacity(items.len());
            for item in &items {
                match to_record(item) {
                    Some(record) => records.push(record),
                    None => report.skipped += 1,
                }
            }

            if let Some(prev) = &previous {
                if records.iter().any(|r| r.watermark() >= *prev) {
                    reached_previous = true;
                }
            }
            for record in &records {
                let mark = record.watermark();
                if max_seen.as_ref().map_or(true, |m| mark > *m) {
                    max_seen = Some(mark);
                }
            }

            let mark = match self.config.order {
                LedgerOrder::OldestFirst => max_seen.as_ref(),
                LedgerOrder::NewestFirst => None,
            };
            report.inserted += self.store.ingest_page(&records, mark).await?;
            debug!("账本第 {} 页: {} 条", report.pages, items.len());
        }

        if !reached_previous {
            let prev = previous.as_ref().map(|w| w.to_string()).unwrap_or_default();
            error!("❌ 远端账本中找不到水位 {} 及之后的记录", prev);
            return Err(SyncError::StoreInconsistency(format!(
                "remote ledger returned no record at or after watermark {}",
                prev
            )));
        }

        if self.config.order == LedgerOrder::NewestFirst && max_seen != previous {
            self.store.ingest_page(&[], max_seen.as_ref()).await?;
        }

        report.watermark = max_seen;
        info!(
            "✅ 账本同步完成: pages={}, seen={}, inserted={}, skipped={}",
            report.pages, report.seen, report.inserted, report.skipped
        );
        Ok(report)
    }
}

/// 账本条目 → 交易记录；缺少帖子、买家或时间时返回 None
pub fn to_record(item: &EarningItem) -> Option<TransactionRecord> {
    let Some(post) = item.post_uuid.as_deref().filter(|p| !p.is_empty()) else {
        return None;
    };
    let Some(buyer) = item.buyer() else {
        return None;
    };
    let Some(date) = item.date else {
        warn!("账本条目缺少时间，跳过: post={}, buyer={}", post, buyer);
        return None;
    };
    // 与 SQLite 中的毫秒精度一致，避免水位比较出现偏差
    let occurred_at = date.trunc_subsecs(3);
    let remote_id = item
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("{}:{}:{}", post, buyer, occurred_at.timestamp_millis()));

    Some(TransactionRecord {
        remote_id,
        buyer: buyer.clone(),
        content_id: post.to_string(),
        amount_cents: item.gross.unwrap_or(0),
        occurred_at,
    })
}
