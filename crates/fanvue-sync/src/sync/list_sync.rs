//! 列表 ↔ 角色同步
//!
//! 每个配对由配置指定权威方：
//!
//! - `FanvuePrimary`：列表为准，只发出角色 grant / revoke，从不写列表
//! - `DiscordPrimary`：角色为准，只写自定义列表，从不改角色
//!
//! 上次完整执行后的快照保存在 KV 中；两侧都没变化时跳过该配对。
//! 快照只是优化信息，丢失后下一轮会完整重算。

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::address_book::AddressBook;
use crate::api::{collect_list_members, MonetizationApi};
use crate::config::{ListPairing, PrimarySide};
use crate::error::{Result, SyncError};
use crate::model::{ActionIntent, ActionKind, FanUuid, ListKind, ListRef, Platform, PlatformId};
use crate::platform::PlatformAdapter;
use crate::storage::KvNamespace;
use crate::sync::pace;

/// KV 命名空间
pub const LIST_SYNC_NAMESPACE: &str = "list_sync";

/// 配对上次完整执行后的状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListLinkState {
    /// 列表成员（排序）
    pub list: Vec<String>,
    /// 角色持有者（排序）
    pub holders: Vec<String>,
    /// 该平台上的绑定关系 `uuid=id`（排序）
    #[serde(default)]
    pub links: Vec<String>,
}

impl ListLinkState {
    fn capture(list: &HashSet<FanUuid>, holders: &HashSet<PlatformId>, book: &AddressBook, platform: Platform) -> Self {
        let list: BTreeSet<String> = list.iter().map(|u| u.to_string()).collect();
        let holders: BTreeSet<String> = holders.iter().map(|p| p.to_string()).collect();
        let mut links = BTreeSet::new();
        for uuid in book.uuids() {
            for id in book.linked_ids(&uuid, platform) {
                links.insert(format!("{}={}", uuid, id));
            }
        }
        Self {
            list: list.into_iter().collect(),
            holders: holders.into_iter().collect(),
            links: links.into_iter().collect(),
        }
    }
}

/// 列表同步产生的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSyncAction {
    /// 角色 grant / revoke（列表为准）
    Role(ActionIntent),
    /// 写入自定义列表（角色为准）
    ListAdd { list_id: String, uuid: FanUuid },
    ListRemove { list_id: String, uuid: FanUuid },
}

impl fmt::Display for ListSyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(intent) => write!(f, "{}", intent),
            Self::ListAdd { list_id, uuid } => write!(f, "list_add {} → {}", uuid, list_id),
            Self::ListRemove { list_id, uuid } => write!(f, "list_remove {} ← {}", uuid, list_id),
        }
    }
}

/// 一个配对的动作计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingPlan {
    /// 已排序：新增在前，移除在后
    pub actions: Vec<ListSyncAction>,
    /// 无法解析的角色持有者
    pub unresolved: usize,
}

/// 计算一个配对的动作（纯函数）
pub fn plan_pairing(
    pairing: &ListPairing,
    list: &HashSet<FanUuid>,
    holders: &HashSet<PlatformId>,
    book: &AddressBook,
    platform: Platform,
) -> PairingPlan {
    let mut additions = Vec::new();
    let mut removals = Vec::new();
    let mut unresolved = 0;

    // 只取能唯一解析回该用户的标识
    let linked = |uuid: &FanUuid| -> Vec<PlatformId> {
        book.linked_ids(uuid, platform)
            .into_iter()
            .filter(|id| book.resolve(id).as_ref() == Some(uuid))
            .collect()
    };

    let mut sorted_holders: Vec<&PlatformId> = holders.iter().collect();
    sorted_holders.sort();
    let mut sorted_list: Vec<&FanUuid> = list.iter().collect();
    sorted_list.sort();

    match pairing.primary {
        PrimarySide::FanvuePrimary => {
            for uuid in &sorted_list {
                for id in linked(*uuid).into_iter().filter(|id| !holders.contains(id)) {
                    additions.push(ListSyncAction::Role(
                        ActionIntent::new(
                            ActionKind::Grant,
                            pairing.target.clone(),
                            id,
                            format!("on list {}", pairing.list_id),
                        )
                        .with_uuid((*uuid).clone()),
                    ));
                }
            }
            for id in &sorted_holders {
                match book.resolve(id) {
                    None => {
                        debug!("[{}] 无法解析的角色持有者 {}，保持不动", pairing.name, id);
                        unresolved += 1;
                    }
                    Some(uuid) if !list.contains(&uuid) => {
                        removals.push(ListSyncAction::Role(
                            ActionIntent::new(
                                ActionKind::Revoke,
                                pairing.target.clone(),
                                (*id).clone(),
                                format!("not on list {}", pairing.list_id),
                            )
                            .with_uuid(uuid),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }
        PrimarySide::DiscordPrimary => {
            let mut added = HashSet::new();
            for id in &sorted_holders {
                match book.resolve_strict(id) {
                    Err(e) => {
                        warn!("⚠️ [{}] 跳过角色持有者: {}", pairing.name, e);
                        unresolved += 1;
                    }
                    Ok(uuid) if !list.contains(&uuid) && added.insert(uuid.clone()) => {
                        additions.push(ListSyncAction::ListAdd {
                            list_id: pairing.list_id.clone(),
                            uuid,
                        });
                    }
                    Ok(_) => {}
                }
            }
            for uuid in &sorted_list {
                let ids = linked(*uuid);
                // 在该平台上没有绑定标识的列表成员不归这个配对管
                if ids.is_empty() {
                    continue;
                }
                if !ids.iter().any(|id| holders.contains(id)) {
                    removals.push(ListSyncAction::ListRemove {
                        list_id: pairing.list_id.clone(),
                        uuid: (*uuid).clone(),
                    });
                }
            }
        }
    }

    additions.extend(removals);
    PairingPlan {
        actions: additions,
        unresolved,
    }
}

/// 列表同步统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSyncReport {
    pub pairings: usize,
    /// 两侧都没变化而跳过的配对
    pub unchanged: usize,
    pub role_grants: usize,
    pub role_revokes: usize,
    pub list_adds: usize,
    pub list_removes: usize,
    pub unresolved: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct ListSyncCoordinator {
    api: Arc<dyn MonetizationApi>,
    book: Arc<AddressBook>,
    adapter: Arc<dyn PlatformAdapter>,
    state: KvNamespace,
    pairings: Vec<ListPairing>,
    pacing: Duration,
    cancel: CancellationToken,
}

impl ListSyncCoordinator {
    /// 智能列表只读，不能作为角色为准的配对
    pub fn new(
        api: Arc<dyn MonetizationApi>,
        book: Arc<AddressBook>,
        adapter: Arc<dyn PlatformAdapter>,
        state: KvNamespace,
        pairings: Vec<ListPairing>,
    ) -> Result<Self> {
        for pairing in &pairings {
            if pairing.primary == PrimarySide::DiscordPrimary && pairing.list_kind == ListKind::Smart {
                return Err(SyncError::Config(format!(
                    "配对 {} 以社区平台为准，但智能列表 {} 是只读的",
                    pairing.name, pairing.list_id
                )));
            }
        }
        Ok(Self {
            api,
            book,
            adapter,
            state,
            pairings,
            pacing: Duration::ZERO,
            cancel: CancellationToken::new(),
        })
    }

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

    /// 依次同步全部配对；列表或成员读取失败会中止本轮
    pub async fn run(&self) -> Result<ListSyncReport> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        info!("🔄 开始列表同步: {} 个配对", self.pairings.len());

        let mut report = ListSyncReport::default();
        let mut first_action = true;
        for pairing in &self.pairings {
            report.pairings += 1;
            self.sync_pairing(pairing, &mut report, &mut first_action).await?;
            if report.cancelled {
                warn!("⏹️ 列表同步被取消");
                return Ok(report);
            }
        }

        info!(
            "✅ 列表同步完成: grant {}, revoke {}, 列表新增 {}, 列表移除 {}, 失败 {}, 跳过 {}",
            report.role_grants, report.role_revokes, report.list_adds, report.list_removes, report.failed, report.unchanged
        );
        Ok(report)
    }

    async fn sync_pairing(&self, pairing: &ListPairing, report: &mut ListSyncReport, first_action: &mut bool) -> Result<()> {
        let platform = self.adapter.platform();
        let list_ref = ListRef::new(pairing.list_id.clone(), pairing.list_kind);

        let list: HashSet<FanUuid> = collect_list_members(self.api.as_ref(), &list_ref).await?.into_iter().collect();
        let holders = self.adapter.current_members(&pairing.target).await?;

        let snapshot = ListLinkState::capture(&list, &holders, &self.book, platform);
        if self.state.get::<ListLinkState>(&pairing.name)?.as_ref() == Some(&snapshot) {
            debug!("[{}] 列表与角色都没有变化，跳过", pairing.name);
            report.unchanged += 1;
            return Ok(());
        }

        let plan = plan_pairing(pairing, &list, &holders, &self.book, platform);
        report.unresolved += plan.unresolved;
        debug!("[{}] {} 个动作 (list={}, holders={})", pairing.name, plan.actions.len(), list.len(), holders.len());

        let mut list_after = list;
        let mut holders_after = holders;
        let mut complete = true;

        for action in &plan.actions {
            if !*first_action && !pace(&self.cancel, self.pacing).await {
                report.cancelled = true;
                return Ok(());
            }
            *first_action = false;

            match self.execute(action).await {
                Ok(()) => {
                    debug!("✓ [{}] {}", pairing.name, action);
                    match action {
                        ListSyncAction::Role(intent) if intent.kind == ActionKind::Grant => {
                            report.role_grants += 1;
                            holders_after.insert(intent.platform_id.clone());
                        }
                        ListSyncAction::Role(intent) => {
                            report.role_revokes += 1;
                            holders_after.remove(&intent.platform_id);
                        }
                        ListSyncAction::ListAdd { uuid, .. } => {
                            report.list_adds += 1;
                            list_after.insert(uuid.clone());
                        }
                        ListSyncAction::ListRemove { uuid, .. } => {
                            report.list_removes += 1;
                            list_after.remove(uuid);
                        }
                    }
                }
                Err(e) => {
                    error!("❌ [{}] 执行失败 {}: {}", pairing.name, action, e);
                    report.failed += 1;
                    complete = false;
                }
            }
        }

        if complete {
            let applied = ListLinkState::capture(&list_after, &holders_after, &self.book, platform);
            self.state.set(&pairing.name, &applied)?;
        } else {
            // 有失败时不记录，下一轮完整重算
            self.state.delete(&pairing.name)?;
        }
        Ok(())
    }

    async fn execute(&self, action: &ListSyncAction) -> Result<()> {
        match action {
            ListSyncAction::Role(intent) => self.adapter.apply(intent).await,
            ListSyncAction::ListAdd { list_id, uuid } => self.api.add_list_member(list_id, uuid).await,
            ListSyncAction::ListRemove { list_id, uuid } => self.api.remove_list_member(list_id, uuid).await,
        }
    }
}
