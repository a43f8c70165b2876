//! 社区平台适配器契约
//!
//! 各平台的机器人（Discord 角色、Matrix 房间）只需实现 [`PlatformAdapter`]；
//! 同步引擎只通过它读取现有成员并执行动作。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ActionIntent, ExpiryPolicy, Platform, PlatformId, TargetId};

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// 目标当前的成员（Discord 角色持有者 / Matrix 房间成员）
    async fn current_members(&self, target: &TargetId) -> Result<HashSet<PlatformId>>;

    /// 执行一个动作；必须幂等（已是目标状态时直接成功）
    async fn apply(&self, intent: &ActionIntent) -> Result<()>;

    /// 规则未配置 on_expiry 时的失效策略
    fn default_expiry(&self) -> ExpiryPolicy {
        self.platform().default_expiry()
    }
}
