//! 变现平台 API 凭据 - OAuth2 授权码 + PKCE，自动刷新 access token
//!
//! 运维方一次性在浏览器里完成授权（`authorization_url` → `exchange_code`），
//! 之后 token 持久化到 JSON 文件，过期前 60 秒自动用 refresh token 续期。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::error::{Result, SyncError};

/// 授权范围
pub const OAUTH_SCOPE: &str = "openid offline_access read:fan read:insights";

/// 距离过期多少秒内视为需要刷新
const REFRESH_MARGIN_SECS: i64 = 60;

/// 未返回 expires_in 时的默认有效期
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Bearer token 来源
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// 固定 token（测试 / 外部预置凭据）
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// 持久化的 token 文件格式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 过期时间（unix 秒）
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default)]
struct TokenState {
    tokens: Option<StoredTokens>,
    code_verifier: Option<String>,
}

/// OAuth token 管理器
pub struct OAuthTokenManager {
    config: AuthConfig,
    http: reqwest::Client,
    token_file: Option<PathBuf>,
    state: Mutex<TokenState>,
    /// 同一时刻只允许一个刷新请求
    refresh_lock: Mutex<()>,
}

impl OAuthTokenManager {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            token_file: config.token_file.clone(),
            config,
            http: reqwest::Client::new(),
            state: Mutex::new(TokenState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// 从 token 文件恢复；文件不存在时返回未授权的管理器
    pub async fn load(config: AuthConfig) -> Result<Self> {
        let manager = Self::new(config);
        if let Some(path) = manager.token_file.clone() {
            if tokio::fs::try_exists(&path).await? {
                let raw = tokio::fs::read(&path).await?;
                let tokens: StoredTokens = serde_json::from_slice(&raw)?;
                info!("已从 {} 恢复 API token", path.display());
                manager.state.lock().await.tokens = Some(tokens);
            }
        }
        Ok(manager)
    }

    pub async fn is_authorized(&self) -> bool {
        self.state.lock().await.tokens.is_some()
    }

    /// 生成授权 URL（同时记住本次 PKCE verifier）
    pub async fn authorization_url(&self) -> Result<String> {
        let verifier = random_urlsafe(32);
        let challenge = pkce_challenge(&verifier);
        let state = random_urlsafe(16);

        let url = reqwest::Url::parse_with_params(
            &format!("{}/auth", self.config.auth_base.trim_end_matches('/')),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", OAUTH_SCOPE),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| SyncError::Config(format!("无效的 auth_base: {}", e)))?;

        self.state.lock().await.code_verifier = Some(verifier);
        Ok(url.to_string())
    }

    /// 用授权码换取 token
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let verifier = self
            .state
            .lock()
            .await
            .code_verifier
            .take()
            .ok_or_else(|| SyncError::Auth("没有待完成的授权请求（先调用 authorization_url）".to_string()))?;

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        let tokens = self.post_token(&form, None).await?;
        self.store(tokens).await?;
        info!("✅ API 授权完成");
        Ok(())
    }

    /// 使用 refresh token 续期
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// 调用方须持有 `refresh_lock`
    async fn refresh_locked(&self) -> Result<()> {
        let previous = self.state.lock().await.tokens.clone();
        let refresh_token = previous
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| SyncError::Auth("No refresh token available".to_string()))?;

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let tokens = self.post_token(&form, Some(refresh_token.as_str())).await?;
        self.store(tokens).await?;
        info!("🔄 API token 已刷新");
        Ok(())
    }

    async fn post_token(&self, form: &[(&str, &str)], previous_refresh: Option<&str>) -> Result<StoredTokens> {
        let url = format!("{}/token", self.config.auth_base.trim_end_matches('/'));
        let response = self.http.post(&url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("token 请求失败: status={}", status);
            return Err(SyncError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }
        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        Ok(StoredTokens {
            access_token: parsed.access_token,
            // 部分授权服务刷新时不轮换 refresh token，沿用旧值
            refresh_token: parsed.refresh_token.or_else(|| previous_refresh.map(String::from)),
            expires_at: chrono::Utc::now().timestamp() + expires_in,
        })
    }

    async fn store(&self, tokens: StoredTokens) -> Result<()> {
        if let Some(path) = &self.token_file {
            persist_tokens(path, &tokens).await?;
        }
        self.state.lock().await.tokens = Some(tokens);
        Ok(())
    }
}

fn needs_refresh(tokens: &StoredTokens) -> bool {
    chrono::Utc::now().timestamp() > tokens.expires_at - REFRESH_MARGIN_SECS
}

#[async_trait]
impl AccessTokenProvider for OAuthTokenManager {
    async fn access_token(&self) -> Result<String> {
        let current = self.state.lock().await.tokens.clone();
        let Some(tokens) = current else {
            return Err(SyncError::Auth("API 尚未授权".to_string()));
        };
        if !needs_refresh(&tokens) {
            return Ok(tokens.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // 等锁期间可能已被其他调用方刷新
        let still_stale = self.state.lock().await.tokens.as_ref().map_or(true, needs_refresh);
        if still_stale {
            self.refresh_locked().await?;
        }
        let state = self.state.lock().await;
        state
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| SyncError::Auth("刷新后没有 token".to_string()))
    }
}

async fn persist_tokens(path: &Path, tokens: &StoredTokens) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let raw = serde_json::to_vec_pretty(tokens)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge = BASE64URL(SHA256(verifier))
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
