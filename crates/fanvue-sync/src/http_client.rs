//! HTTP 客户端模块 - 变现平台 API 的限流调用
//!
//! 每次请求先从 [`ApiRateLimiter`] 取令牌，再带上 Bearer token 与固定的
//! `X-Fanvue-API-Version` 头发出。收到 429 时按 Retry-After 挂起并重试一次；
//! 响应头里的剩余预算会反馈给限流器。

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::auth::AccessTokenProvider;
use crate::config::{ApiConfig, HttpClientConfig};
use crate::error::{Result, SyncError};
use crate::rate_limiter::{parse_retry_after, ApiRateLimiter, WaitPolicy, DEFAULT_RETRY_AFTER};

pub const API_VERSION_HEADER: &str = "X-Fanvue-API-Version";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// 小于该值的 reset 视为相对秒数，否则为 unix 时间戳
const EPOCH_THRESHOLD: i64 = 1_000_000_000;

/// 成功响应
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| SyncError::Serialization(format!("解析响应失败: {} (body={})", e, truncate(&self.body))))
    }
}

/// 变现平台 HTTP 客户端
pub struct FanvueHttpClient {
    client: Client,
    api_base: String,
    api_version: String,
    limiter: Arc<ApiRateLimiter>,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FanvueHttpClient {
    pub fn new(
        api: &ApiConfig,
        http: &HttpClientConfig,
        limiter: Arc<ApiRateLimiter>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = http.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = http.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| SyncError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 客户端已创建 (api_base: {})", api.api_base);

        Ok(Self {
            client,
            api_base: api.api_base.trim_end_matches('/').to_string(),
            api_version: api.api_version.clone(),
            limiter,
            tokens,
        })
    }

    pub fn limiter(&self) -> &Arc<ApiRateLimiter> {
        &self.limiter
    }

    /// 发出一次 API 调用
    ///
    /// 429 时挂起 Retry-After（缺省 5 秒）后重试一次，仍为 429 则返回
    /// `Remote{429}`；`WaitPolicy::FailFast` 下不等待，直接返回 `RateLimitExceeded`。
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<&serde_json::Value>,
        policy: WaitPolicy,
    ) -> Result<ApiResponse> {
        let url = format!("{}{}", self.api_base, endpoint);
        let mut retried = false;

        loop {
            self.limiter.acquire_with(endpoint, policy).await?;
            let token = self.tokens.access_token().await?;

            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(token)
                .header(API_VERSION_HEADER, &self.api_version);
            if !params.is_empty() {
                request = request.query(params);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("➡️ {} {} params={:?}", method, endpoint, params);
            let response = request.send().await.map_err(|e| {
                warn!("请求失败: {} {}: {}", method, endpoint, e);
                SyncError::Transport(format!("{} {}: {}", method, endpoint, e))
            })?;

            self.observe_budget(response.headers());
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                let text = response.text().await.unwrap_or_default();

                if retried {
                    error!("❌ 重试后仍被限流: {} {}", method, endpoint);
                    return Err(SyncError::Remote { status: 429, body: text });
                }
                if policy == WaitPolicy::FailFast {
                    return Err(SyncError::RateLimitExceeded {
                        endpoint: endpoint.to_string(),
                        retry_in: wait,
                    });
                }
                warn!("⏳ 被远端限流，{:.1}s 后重试: {} {}", wait.as_secs_f64(), method, endpoint);
                tokio::time::sleep(wait).await;
                retried = true;
                continue;
            }

            let text = response.text().await?;
            if !status.is_success() {
                debug!("远端返回错误: status={}, endpoint={}", status, endpoint);
                return Err(SyncError::Remote {
                    status: status.as_u16(),
                    body: text,
                });
            }
            return Ok(ApiResponse {
                status: status.as_u16(),
                body: text,
            });
        }
    }

    /// GET 并解析 JSON
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        self.request(Method::GET, endpoint, params, None, WaitPolicy::Wait)
            .await?
            .json()
    }

    fn observe_budget(&self, headers: &HeaderMap) {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let Some(remaining) = header(REMAINING_HEADER).and_then(|v| v.parse::<u32>().ok()) else {
            return;
        };
        let Some(reset) = header(RESET_HEADER).and_then(|v| v.parse::<i64>().ok()) else {
            return;
        };
        let reset_in_secs = if reset >= EPOCH_THRESHOLD {
            reset - chrono::Utc::now().timestamp()
        } else {
            reset
        };
        if reset_in_secs > 0 {
            self.limiter
                .observe_remote_budget(remaining, Duration::from_secs(reset_in_secs as u64));
        }
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
