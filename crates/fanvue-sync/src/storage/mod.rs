//! 存储模块
//!
//! - 交易缓存：SQLite（rusqlite + refinery 迁移），DAO 每表一个
//! - KV：sled，保存列表同步的上次快照

pub mod dao;
pub mod entities;
pub mod kv;
pub mod migrate;
pub mod transaction_store;

pub use entities::{TransactionRecord, Watermark};
pub use kv::{KvNamespace, KvStore};
pub use transaction_store::TransactionStore;
