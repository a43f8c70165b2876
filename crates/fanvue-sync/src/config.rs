//! 同步配置
//!
//! 配置文件的读取与解析由宿主进程负责；这里只定义结构、默认值、构建器与校验。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{ListKind, TargetId};
use crate::rate_limiter::RateLimiterConfig;
use crate::rules::{RuleMap, RuleSet};

/// 变现平台 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API 基础 URL
    pub api_base: String,
    /// `X-Fanvue-API-Version` 请求头
    pub api_version: String,
    /// 分页大小
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.fanvue.com".to_string(),
            api_version: "2025-06-26".to_string(),
            page_size: 50,
        }
    }
}

/// OAuth 凭据配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    /// token 持久化文件
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

fn default_auth_base() -> String {
    "https://auth.fanvue.com/oauth2".to_string()
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 远端账本返回顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOrder {
    /// 旧 → 新：每页提交后即可推进水位
    OldestFirst,
    /// 新 → 旧：整轮扫描完成时才推进水位
    #[default]
    NewestFirst,
}

/// 账本增量同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub order: LedgerOrder,
    /// 只拉取这些来源的收入（解锁内容为 `post`）
    pub sources: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            order: LedgerOrder::default(),
            sources: vec!["post".to_string()],
        }
    }
}

/// 列表 ↔ 角色同步的权威方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySide {
    /// 列表为准，角色是派生视图
    #[serde(alias = "fanvue-primary")]
    FanvuePrimary,
    /// 社区平台角色为准，列表是派生视图
    #[serde(alias = "discord-primary", alias = "community_primary")]
    DiscordPrimary,
}

/// 一组列表同步配对
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPairing {
    /// 配对名（日志 / 状态存储键）
    pub name: String,
    pub target: TargetId,
    pub list_id: String,
    #[serde(default)]
    pub list_kind: ListKind,
    pub primary: PrimarySide,
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 数据目录（交易缓存、KV、地址簿）
    pub data_dir: PathBuf,
    pub api: ApiConfig,
    pub rate_limit: RateLimiterConfig,
    pub http: HttpClientConfig,
    pub ledger: LedgerConfig,
    /// 目标 → 规则集（有序）
    #[serde(default)]
    pub rules: RuleMap,
    #[serde(default)]
    pub list_sync: Vec<ListPairing>,
    /// 相邻两个平台动作之间的间隔（毫秒）
    pub action_pacing_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            api: ApiConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            http: HttpClientConfig::default(),
            ledger: LedgerConfig::default(),
            rules: RuleMap::default(),
            list_sync: Vec::new(),
            action_pacing_ms: 1000,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    pub fn transaction_db_path(&self) -> PathBuf {
        self.data_dir.join("transactions.db")
    }

    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    pub fn address_book_path(&self, file_name: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn action_pacing(&self) -> Duration {
        Duration::from_millis(self.action_pacing_ms)
    }

    /// 校验配置；返回第一个问题
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.capacity == 0 || self.rate_limit.window_secs == 0 {
            return Err(SyncError::Config("rate_limit.capacity 与 window_secs 必须大于 0".to_string()));
        }
        if self.api.page_size == 0 {
            return Err(SyncError::Config("api.page_size 必须大于 0".to_string()));
        }
        for entry in self.rules.iter() {
            if entry.rules.rules.is_empty() {
                return Err(SyncError::Config(format!("目标 {} 没有配置任何规则", entry.target)));
            }
        }
        let mut names = std::collections::HashSet::new();
        for pairing in &self.list_sync {
            if !names.insert(pairing.name.as_str()) {
                return Err(SyncError::Config(format!("列表同步配对重名: {}", pairing.name)));
            }
            if pairing.primary == PrimarySide::DiscordPrimary && pairing.list_kind == ListKind::Smart {
                return Err(SyncError::Config(format!(
                    "配对 {} 以社区平台为准，但智能列表 {} 是只读的",
                    pairing.name, pairing.list_id
                )));
            }
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api.api_base = base.into();
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.config.api.page_size = size;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn http(mut self, http: HttpClientConfig) -> Self {
        self.config.http = http;
        self
    }

    pub fn ledger_order(mut self, order: LedgerOrder) -> Self {
        self.config.ledger.order = order;
        self
    }

    pub fn rule(mut self, target: impl Into<TargetId>, rules: RuleSet) -> Self {
        self.config.rules.insert(target.into(), rules);
        self
    }

    pub fn list_pairing(mut self, pairing: ListPairing) -> Self {
        self.config.list_sync.push(pairing);
        self
    }

    pub fn action_pacing_ms(mut self, ms: u64) -> Self {
        self.config.action_pacing_ms = ms;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}
