//! 领域模型 - 身份、目标、用户快照与动作意图
//!
//! 这里的类型在一个同步周期内构造、使用、丢弃；只有地址簿与交易缓存会持久化。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 变现平台上的规范用户 ID（Fanvue UUID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FanUuid(String);

impl FanUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FanUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FanUuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FanUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// 社区平台上的用户标识（Discord snowflake / Matrix MXID），原样保存
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformId(String);

impl PlatformId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlatformId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for PlatformId {
    fn from(snowflake: u64) -> Self {
        Self(snowflake.to_string())
    }
}

/// 社区平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Discord,
    Matrix,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Matrix => "matrix",
        }
    }

    /// 按标识的结构判断它属于哪个平台：MXID 形如 `@local:server`，Discord 为纯数字
    pub fn classify(id: &PlatformId) -> Option<Platform> {
        let s = id.as_str();
        if s.starts_with('@') && s.contains(':') {
            Some(Self::Matrix)
        } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self::Discord)
        } else {
            None
        }
    }

    pub fn owns(self, id: &PlatformId) -> bool {
        Self::classify(id) == Some(self)
    }

    /// 未配置 on_expiry 时的默认策略：Discord 摘角色，Matrix 踢出房间
    pub fn default_expiry(self) -> ExpiryPolicy {
        match self {
            Self::Discord => ExpiryPolicy::RemoveMembership,
            Self::Matrix => ExpiryPolicy::Kick,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 同步目标：Discord 角色 ID 或 Matrix 房间别名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 变现平台列表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    /// 手动维护的自定义列表（可写）
    #[default]
    Custom,
    /// 平台按条件计算的智能列表（只读快照）
    Smart,
}

impl ListKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Smart => "smart",
        }
    }
}

/// 远端列表引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListRef {
    pub id: String,
    #[serde(default)]
    pub kind: ListKind,
}

impl ListRef {
    pub fn new(id: impl Into<String>, kind: ListKind) -> Self {
        Self { id: id.into(), kind }
    }
}

impl fmt::Display for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// 权益失效时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// 移除角色 / 房间成员资格
    #[serde(alias = "remove_role", alias = "revoke")]
    RemoveMembership,
    /// 踢出
    Kick,
    /// 保留（永久 grandfather，除非人工移除）
    Ignore,
}

impl ExpiryPolicy {
    /// 破坏性排序：数值越小越保守。多条规则冲突时取最保守者。
    fn severity(self) -> u8 {
        match self {
            Self::Ignore => 0,
            Self::RemoveMembership => 1,
            Self::Kick => 2,
        }
    }

    pub fn least_destructive(self, other: ExpiryPolicy) -> ExpiryPolicy {
        if other.severity() < self.severity() {
            other
        } else {
            self
        }
    }
}

/// 单个用户在本周期的权益快照（每周期从远端快照 + 本地交易缓存重新构造）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUser {
    pub uuid: FanUuid,
    /// 出现在本周期的订阅者或关注者列表中
    pub on_platform: bool,
    pub active_subscription: bool,
    /// 累计消费（最小货币单位）；None 表示本周期洞察查询失败
    pub lifetime_spend_cents: Option<i64>,
    pub top_spender: bool,
    pub unlocked_content: HashSet<String>,
    /// 用户当前所在的远端列表（快照）
    pub lists: HashSet<ListRef>,
}

impl CanonicalUser {
    /// 不在订阅者 / 关注者中、也没有任何解锁或列表记录的用户：所有规则都判定为 false
    pub fn absent(uuid: FanUuid) -> Self {
        Self {
            uuid,
            on_platform: false,
            active_subscription: false,
            lifetime_spend_cents: Some(0),
            top_spender: false,
            unlocked_content: HashSet::new(),
            lists: HashSet::new(),
        }
    }

    /// 出现在订阅者 / 关注者中的用户，其余权益待填充
    pub fn present(uuid: FanUuid) -> Self {
        Self {
            on_platform: true,
            ..Self::absent(uuid)
        }
    }
}

/// (用户, 规则) 的判定结果；瞬时，不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDecision {
    pub uuid: FanUuid,
    pub target: TargetId,
    pub rule_index: usize,
    pub holds: bool,
}

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Grant,
    Revoke,
    Kick,
    Ignore,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Revoke => "revoke",
            Self::Kick => "kick",
            Self::Ignore => "ignore",
        }
    }

    pub fn is_removal(self) -> bool {
        matches!(self, Self::Revoke | Self::Kick)
    }
}

/// 动作意图：交给平台适配器执行；重复执行与执行一次效果相同
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionIntent {
    pub kind: ActionKind,
    pub target: TargetId,
    pub platform_id: PlatformId,
    /// 已解析的规范用户（无法解析时为 None）
    pub uuid: Option<FanUuid>,
    /// 触发该动作的规则下标（列表同步为 None）
    pub rule_index: Option<usize>,
    /// 人类可读的原因，写入审计日志 / 平台 reason 字段
    pub reason: String,
}

impl ActionIntent {
    pub fn new(kind: ActionKind, target: TargetId, platform_id: PlatformId, reason: impl Into<String>) -> Self {
        Self {
            kind,
            target,
            platform_id,
            uuid: None,
            rule_index: None,
            reason: reason.into(),
        }
    }

    pub fn with_uuid(mut self, uuid: FanUuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_rule(mut self, rule_index: usize) -> Self {
        self.rule_index = Some(rule_index);
        self
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}", self.kind.as_str(), self.platform_id, self.target)
    }
}
