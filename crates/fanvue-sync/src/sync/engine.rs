//! 成员资格同步引擎 - 单周期入口
//!
//! 一个周期：账本增量同步 → 构造快照 → 逐目标差异 → 按序执行。
//! 周期本身不重试、不调度；节奏由调用方决定。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address_book::AddressBook;
use crate::api::MonetizationApi;
use crate::error::{Result, SyncError};
use crate::model::{ActionIntent, ActionKind};
use crate::platform::PlatformAdapter;
use crate::rules::RuleMap;
use crate::storage::TransactionStore;
use crate::sync::ledger::{LedgerSync, LedgerSyncReport};
use crate::sync::planner::{SyncPlan, TargetDiff};
use crate::sync::universe::Universe;
use crate::sync::pace;

/// 一个周期的结果
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// 账本同步结果（失败时为 None，沿用已缓存的交易）
    pub ledger: Option<LedgerSyncReport>,
    pub users: usize,
    pub targets: usize,
    /// 观察成员读取失败而跳过的目标
    pub skipped_targets: usize,
    pub planned: usize,
    pub granted: usize,
    pub revoked: usize,
    pub kicked: usize,
    pub failed: usize,
    /// on_expiry = ignore 保留的成员
    pub ignored: Vec<ActionIntent>,
    pub unresolved: usize,
    pub evaluation_errors: usize,
    pub deferred_removals: usize,
    /// 执行途中被取消
    pub cancelled: bool,
}

impl CycleReport {
    fn from_plan(plan: &SyncPlan) -> Self {
        Self {
            targets: plan.targets,
            planned: plan.action_count(),
            ignored: plan.ignored.clone(),
            unresolved: plan.unresolved,
            evaluation_errors: plan.evaluation_errors,
            deferred_removals: plan.deferred_removals,
            ..Self::default()
        }
    }

    pub fn applied(&self) -> usize {
        self.granted + self.revoked + self.kicked
    }
}

/// 规划结果：计划本身 + 规划阶段的统计
#[derive(Debug, Clone, Default)]
pub struct CyclePlan {
    pub plan: SyncPlan,
    pub ledger: Option<LedgerSyncReport>,
    pub users: usize,
    pub skipped_targets: usize,
}

pub struct SyncEngine {
    api: Arc<dyn MonetizationApi>,
    book: Arc<AddressBook>,
    adapter: Arc<dyn PlatformAdapter>,
    rules: RuleMap,
    ledger: LedgerSync,
    pacing: Duration,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn MonetizationApi>,
        store: Arc<TransactionStore>,
        book: Arc<AddressBook>,
        adapter: Arc<dyn PlatformAdapter>,
        rules: RuleMap,
        ledger_config: crate::config::LedgerConfig,
    ) -> Self {
        Self {
            ledger: LedgerSync::new(api.clone(), store, ledger_config),
            api,
            book,
            adapter,
            rules,
            pacing: Duration::ZERO,
            cancel: CancellationToken::new(),
        }
    }

    /// 相邻两个平台动作之间的间隔
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 只规划不执行（dry run）
    pub async fn plan_cycle(&self) -> Result<CyclePlan> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let ledger = match self.ledger.run().await {
            Ok(report) => Some(report),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("账本同步失败，沿用本地缓存: {}", e);
                None
            }
        };

        let universe = Universe::build(self.api.as_ref(), self.ledger.store(), &self.book, &self.rules).await?;

        let platform = self.adapter.platform();
        let default_expiry = self.adapter.default_expiry();
        let mut plan = SyncPlan::default();
        let mut skipped_targets = 0;

        for entry in self.rules.iter() {
            let observed = match self.adapter.current_members(&entry.target).await {
                Ok(members) => members,
                Err(e) => {
                    error!("❌ 读取 {} 的现有成员失败，跳过该目标: {}", entry.target, e);
                    skipped_targets += 1;
                    continue;
                }
            };
            TargetDiff {
                target: &entry.target,
                rules: &entry.rules,
                observed: &observed,
                platform,
                default_expiry,
            }
            .plan_into(&mut plan, &universe, &self.book);
        }

        info!(
            "📋 计划完成: {} 个目标, grant {}, 移除 {}, ignore {}",
            plan.targets,
            plan.grants.len(),
            plan.removals.len(),
            plan.ignored.len()
        );

        Ok(CyclePlan {
            plan,
            ledger,
            users: universe.len(),
            skipped_targets,
        })
    }

    /// 规划并执行一个周期
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        info!("🔄 开始同步周期 ({})", self.adapter.platform());
        let planned = self.plan_cycle().await?;

        let mut report = CycleReport::from_plan(&planned.plan);
        report.ledger = planned.ledger;
        report.users = planned.users;
        report.skipped_targets = planned.skipped_targets;

        for (i, intent) in planned.plan.actions().enumerate() {
            if i > 0 && !pace(&self.cancel, self.pacing).await {
                report.cancelled = true;
                break;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.adapter.apply(intent).await {
                Ok(()) => {
                    debug!("✓ {} ({})", intent, intent.reason);
                    match intent.kind {
                        ActionKind::Grant => report.granted += 1,
                        ActionKind::Revoke => report.revoked += 1,
                        ActionKind::Kick => report.kicked += 1,
                        ActionKind::Ignore => {}
                    }
                }
                Err(e) => {
                    error!("❌ 执行失败 {}: {}", intent, e);
                    report.failed += 1;
                }
            }
        }

        if report.cancelled {
            warn!("⏹️ 周期被取消: 已执行 {}/{}", report.applied() + report.failed, report.planned);
        } else {
            info!(
                "✅ 同步周期完成: grant {}, revoke {}, kick {}, 失败 {}, ignore {}",
                report.granted,
                report.revoked,
                report.kicked,
                report.failed,
                report.ignored.len()
            );
        }
        Ok(report)
    }
}
