//! 出站限流模块
//!
//! 变现平台 API 有严格的调用预算（默认 100 次 / 60 秒）。本模块在客户端侧
//! 维护同样大小的令牌桶，在发出请求之前扣减令牌：
//!
//! 1. **令牌桶** - 桶空时挂起调用方直到下一次补充，而不是先发请求再吃 429
//! 2. **429 退避** - 解析 Retry-After，挂起后由 HTTP 客户端重试一次
//! 3. **响应头预算** - `X-RateLimit-Remaining` 过低时主动清空本地桶，等到 reset
//!
//! 令牌桶状态由限流器实例持有，不是进程级全局状态，测试中可以并存多个限流器。
//! 所有等待都是 `tokio::time::sleep`（协作式挂起），不会阻塞线程。

use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 未携带或无法解析 Retry-After 时的默认等待
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// 令牌桶（由外层锁保证线程安全）
#[derive(Debug)]
pub struct TokenBucket {
    /// 令牌容量
    capacity: f64,
    /// 当前令牌数
    tokens: f64,
    /// 每秒补充的令牌数
    refill_rate: f64,
    /// 上次补充时间（可能位于未来：被响应头暂停时）
    last_refill: Instant,
}

impl TokenBucket {
    /// 创建新的令牌桶（初始满令牌）
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// 尝试消耗指定数量的令牌
    ///
    /// 返回：(是否成功, 需要等待的时间)
    pub fn try_consume(&mut self, tokens_needed: f64) -> (bool, Option<Duration>) {
        self.refill();

        if self.tokens >= tokens_needed {
            self.tokens -= tokens_needed;
            (true, None)
        } else {
            let now = Instant::now();
            let paused_for = self.last_refill.saturating_duration_since(now);
            let tokens_deficit = tokens_needed - self.tokens;
            let wait_duration = paused_for + Duration::from_secs_f64(tokens_deficit / self.refill_rate);
            (false, Some(wait_duration))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// 清空令牌，并在 `resume_at` 之前停止补充
    pub fn pause_until(&mut self, resume_at: Instant) {
        self.refill();
        self.tokens = 0.0;
        if resume_at > self.last_refill {
            self.last_refill = resume_at;
        }
    }

    /// 获取当前令牌数
    pub fn available_tokens(&mut self) -> f64 {
        self.refill();
        self.tokens
    }
}

/// 限流器配置
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RateLimiterConfig {
    /// 窗口内允许的请求数（桶容量）
    pub capacity: u32,
    /// 补充窗口（秒）：capacity 个令牌在该窗口内匀速补满
    pub window_secs: u64,
    /// `X-RateLimit-Remaining` 低于该值时主动等待 reset
    pub header_floor: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            window_secs: 60,
            header_floor: 5,
        }
    }
}

impl RateLimiterConfig {
    pub fn refill_rate(&self) -> f64 {
        self.capacity as f64 / self.window_secs.max(1) as f64
    }
}

/// 等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// 桶空 / 429 时挂起等待（默认）
    #[default]
    Wait,
    /// 不等待，立即返回 RateLimitExceeded
    FailFast,
}

/// 限流错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("请求超限: {endpoint}, 需要等待 {wait_duration:?}")]
    Exceeded {
        endpoint: String,
        wait_duration: Duration,
    },
}

impl From<RateLimitError> for crate::error::SyncError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Exceeded { endpoint, wait_duration } => crate::error::SyncError::RateLimitExceeded {
                endpoint,
                retry_in: wait_duration,
            },
        }
    }
}

/// 限流器统计信息
#[derive(Debug, Clone, Default)]
pub struct ApiRateLimiterStats {
    pub total_requests: u64,
    pub suspended_requests: u64,
    pub rejected_requests: u64,
    pub header_pauses: u64,
}

/// API 限流器
#[derive(Debug)]
pub struct ApiRateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<TokenBucket>,
    stats: RwLock<ApiRateLimiterStats>,
}

impl ApiRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config.capacity as f64, config.refill_rate())),
            stats: RwLock::new(ApiRateLimiterStats::default()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// 获取一个令牌；桶空时挂起到下一次补充
    pub async fn acquire(&self, endpoint: &str) {
        let mut suspended = false;
        loop {
            let (success, wait) = self.bucket.lock().try_consume(1.0);
            if success {
                let mut stats = self.stats.write();
                stats.total_requests += 1;
                if suspended {
                    stats.suspended_requests += 1;
                }
                return;
            }
            let wait = wait.unwrap_or(Duration::from_millis(10));
            debug!("令牌桶已空，挂起 {}ms: endpoint={}", wait.as_millis(), endpoint);
            suspended = true;
            tokio::time::sleep(wait).await;
        }
    }

    /// 非等待版本：桶空时返回 Exceeded
    pub fn try_acquire(&self, endpoint: &str) -> Result<(), RateLimitError> {
        let (success, wait) = self.bucket.lock().try_consume(1.0);
        if success {
            self.stats.write().total_requests += 1;
            return Ok(());
        }
        self.stats.write().rejected_requests += 1;
        let wait_duration = wait.unwrap_or_default();
        warn!("请求超限: endpoint={}, 需要等待 {}ms", endpoint, wait_duration.as_millis());
        Err(RateLimitError::Exceeded {
            endpoint: endpoint.to_string(),
            wait_duration,
        })
    }

    /// 按策略获取令牌
    pub async fn acquire_with(&self, endpoint: &str, policy: WaitPolicy) -> Result<(), RateLimitError> {
        match policy {
            WaitPolicy::Wait => {
                self.acquire(endpoint).await;
                Ok(())
            }
            WaitPolicy::FailFast => self.try_acquire(endpoint),
        }
    }

    /// 根据远端响应头校准本地预算
    ///
    /// `remaining` 低于下限且 `reset_in` 为正时清空本地桶，后续调用等到 reset。
    pub fn observe_remote_budget(&self, remaining: u32, reset_in: Duration) {
        if remaining >= self.config.header_floor || reset_in.is_zero() {
            return;
        }
        warn!(
            "远端预算偏低 (remaining={})，暂停 {:.1}s 直到窗口重置",
            remaining,
            reset_in.as_secs_f64()
        );
        self.bucket.lock().pause_until(Instant::now() + reset_in);
        self.stats.write().header_pauses += 1;
    }

    pub fn available_tokens(&self) -> f64 {
        self.bucket.lock().available_tokens()
    }

    pub fn stats(&self) -> ApiRateLimiterStats {
        self.stats.read().clone()
    }
}

/// 解析 Retry-After（秒，允许小数）；无法解析返回 None
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
