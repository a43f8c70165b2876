//! Fanvue Sync - 会员权益同步引擎
//!
//! 把变现平台上的权益（订阅、消费、解锁、列表）同步为社区平台上的成员资格：
//! - 💰 限流的 API 客户端：令牌桶 + 响应头预算 + 429 退避
//! - 📒 地址簿：规范 UUID ↔ Discord / Matrix 标识，YAML 原样往返
//! - 🗄️ 交易缓存：只追加的 SQLite 账本副本与增量水位
//! - ⚖️ 规则判定：纯函数，无 I/O
//! - 🔄 同步引擎：差异计算，先 grant 后移除，可 dry run、可取消
//! - 📋 列表同步：列表与角色之间按配置的权威方单向对齐
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fanvue_sync::{
//!     AddressBook, ApiRateLimiter, FanvueApi, FanvueHttpClient, StaticToken, SyncConfig, SyncEngine,
//!     TransactionStore,
//! };
//!
//! let config = SyncConfig::builder().data_dir("/var/lib/fanvue-sync").build();
//! config.validate()?;
//!
//! let limiter = Arc::new(ApiRateLimiter::new(config.rate_limit.clone()));
//! let http = FanvueHttpClient::new(&config.api, &config.http, limiter, Arc::new(StaticToken("token".into())))?;
//! let api = Arc::new(FanvueApi::new(http, config.api.page_size));
//! let store = Arc::new(TransactionStore::open(config.transaction_db_path())?);
//! let book = Arc::new(AddressBook::load(config.address_book_path("address_book.yaml"))?);
//!
//! // adapter: 宿主提供的 PlatformAdapter 实现（Discord / Matrix）
//! let engine = SyncEngine::new(api, store, book, adapter, config.rules.clone(), config.ledger.clone())
//!     .with_pacing(config.action_pacing());
//! let report = engine.run_cycle().await?;
//! ```

// 导出核心模块
pub mod error;
pub mod version;
pub mod model;
pub mod config;
pub mod rate_limiter;
pub mod auth;
pub mod http_client;
pub mod api;
pub mod address_book;
pub mod storage;
pub mod rules;
pub mod platform;
pub mod sync;

#[cfg(test)]
mod testing;

// 重新导出核心类型，方便使用
pub use error::{Result, SyncError};
pub use model::{
    ActionIntent, ActionKind, CanonicalUser, ExpiryPolicy, FanUuid, ListKind, ListRef, Platform, PlatformId,
    SyncDecision, TargetId,
};
pub use config::{ApiConfig, AuthConfig, HttpClientConfig, LedgerConfig, LedgerOrder, ListPairing, PrimarySide, SyncConfig};
pub use rate_limiter::{ApiRateLimiter, ApiRateLimiterStats, RateLimitError, RateLimiterConfig, WaitPolicy};
pub use auth::{AccessTokenProvider, OAuthTokenManager, StaticToken};
pub use http_client::FanvueHttpClient;
pub use api::{FanvueApi, MonetizationApi};
pub use address_book::AddressBook;
pub use storage::{KvStore, TransactionRecord, TransactionStore, Watermark};
pub use rules::{evaluate, Rule, RuleKind, RuleMap, RuleSet};
pub use platform::PlatformAdapter;
pub use sync::{CycleReport, LedgerSync, ListSyncCoordinator, ListSyncReport, SyncEngine, SyncPlan};
pub use version::version_line;
