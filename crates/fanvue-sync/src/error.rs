use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum SyncError {
    /// 调用方选择不等待令牌（WaitPolicy::FailFast）
    RateLimitExceeded {
        endpoint: String,
        retry_in: Duration,
    },
    /// 远端 API 失败（含 429 重试后仍失败、4xx/5xx）
    Remote {
        status: u16,
        body: String,
    },
    /// 传输层错误（连接失败、超时）
    Transport(String),
    /// 地址簿没有映射（跳过条件，不是故障）
    UnresolvedIdentity(String),
    /// 本地水位领先于远端账本（需人工介入）
    StoreInconsistency(String),
    Auth(String),
    Config(String),
    SqliteError(rusqlite::Error),
    Database(String),
    Migration(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    InvalidData(String),
    /// 周期被取消
    Cancelled,
    Other(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::RateLimitExceeded { endpoint, retry_in } => {
                write!(f, "Rate limit exceeded for {} (retry in {:?})", endpoint, retry_in)
            }
            SyncError::Remote { status, body } => write!(f, "Remote error [{}]: {}", status, body),
            SyncError::Transport(e) => write!(f, "Transport error: {}", e),
            SyncError::UnresolvedIdentity(e) => write!(f, "Unresolved identity: {}", e),
            SyncError::StoreInconsistency(e) => write!(f, "Store inconsistency: {}", e),
            SyncError::Auth(e) => write!(f, "Authentication error: {}", e),
            SyncError::Config(e) => write!(f, "Config error: {}", e),
            SyncError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            SyncError::Database(e) => write!(f, "Database error: {}", e),
            SyncError::Migration(e) => write!(f, "Migration error: {}", e),
            SyncError::KvStore(e) => write!(f, "KV store error: {}", e),
            SyncError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SyncError::IO(e) => write!(f, "IO error: {}", e),
            SyncError::InvalidData(e) => write!(f, "Invalid data: {}", e),
            SyncError::Cancelled => write!(f, "Sync cycle cancelled"),
            SyncError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<rusqlite::Error> for SyncError {
    fn from(error: rusqlite::Error) -> Self {
        SyncError::SqliteError(error)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(error: serde_yaml::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::IO(error.to_string())
    }
}

impl From<sled::Error> for SyncError {
    fn from(error: sled::Error) -> Self {
        SyncError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => SyncError::Remote {
                status: status.as_u16(),
                body: error.to_string(),
            },
            None => SyncError::Transport(error.to_string()),
        }
    }
}

impl SyncError {
    /// 本地缓存与远端账本不一致：整个进程应停止并等待人工处理
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::StoreInconsistency(_))
    }

    /// 远端或传输层失败（下一周期重试即可）
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncError::Remote { .. } | SyncError::Transport(_))
    }

    /// 远端返回的 HTTP 状态码（传输层失败为 None）
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            SyncError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
