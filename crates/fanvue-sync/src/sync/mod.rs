//! 同步层：账本增量同步、快照、差异计算、周期执行、列表同步

pub mod engine;
pub mod ledger;
pub mod list_sync;
pub mod planner;
pub mod universe;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use engine::{CyclePlan, CycleReport, SyncEngine};
pub use ledger::{LedgerSync, LedgerSyncReport};
pub use list_sync::{ListLinkState, ListSyncAction, ListSyncCoordinator, ListSyncReport, LIST_SYNC_NAMESPACE};
pub use planner::{SyncPlan, TargetDiff};
pub use universe::{InsightCache, Universe};

/// 等待一个动作间隔；期间被取消时返回 false
pub(crate) async fn pace(cancel: &CancellationToken, pacing: Duration) -> bool {
    if pacing.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(pacing) => true,
    }
}
