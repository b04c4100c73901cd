//! 熔断器：按外部依赖（LLM / 记忆存储 / 技能执行）各持一个实例
//!
//! 状态机 CLOSED -> OPEN -> HALF_OPEN -> CLOSED：
//! - CLOSED：放行调用，每次调用有独立超时，超时计为失败；连续失败达到阈值即打开
//! - OPEN：快速失败，直到距上次失败超过 reset_timeout，下一次调用先切换到 HALF_OPEN 再尝试
//! - HALF_OPEN：同一时刻只放行一个试探调用；失败立即重新打开，连续成功达到阈值则关闭并清零计数
//!
//! 计数器放在 std Mutex 中，锁从不跨越 `.await`。

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// 单个依赖的熔断参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// 连续失败多少次后打开
    pub failure_threshold: u32,
    /// HALF_OPEN 下连续成功多少次后关闭
    pub success_threshold: u32,
    /// 单次调用超时（毫秒）
    pub timeout_ms: u64,
    /// OPEN 持续多久后允许试探（毫秒）
    pub reset_timeout_ms: u64,
}

impl BreakerConfig {
    /// 模型调用：超时短、容忍失败少
    pub fn llm() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            timeout_ms: 10_000,
            reset_timeout_ms: 30_000,
        }
    }

    /// 存储调用：超时长、容忍度高
    pub fn storage() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            reset_timeout_ms: 60_000,
        }
    }

    /// 技能执行
    pub fn skills() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            reset_timeout_ms: 30_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// 启动时校验：阈值与超时必须为正
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(format!("breaker '{name}': thresholds must be >= 1"));
        }
        if self.timeout_ms == 0 || self.reset_timeout_ms == 0 {
            return Err(format!("breaker '{name}': timeouts must be > 0"));
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::skills()
    }
}

/// 经熔断器调用的结果错误
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// 熔断器打开（或 HALF_OPEN 已有试探调用），未调用被包装函数
    #[error("circuit '{name}' is open")]
    Open { name: String },

    #[error("call through '{name}' timed out after {after_ms}ms")]
    Timeout { name: String, after_ms: u64 },

    #[error("{0}")]
    Inner(E),
}

/// 计数器快照（可序列化，用于日志与诊断）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    pub last_failure_ago_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// HALF_OPEN 试探许可；调用被取消（future 被丢弃）时归还许可
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前状态（不触发 OPEN -> HALF_OPEN 迁移，迁移只发生在下一次调用时）
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// 经熔断器执行一次调用：先判定是否放行，再与超时竞速
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.admit()?;

        let outcome = tokio::time::timeout(self.config.timeout(), f()).await;
        permit.armed = false;

        match outcome {
            Ok(Ok(value)) => {
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.on_failure();
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after_ms: self.config.timeout_ms,
                })
            }
        }
    }

    /// 放行判定；OPEN 且已过 reset_timeout 时在此迁移到 HALF_OPEN
    fn admit<E>(&self) -> Result<TrialPermit<'_>, BreakerError<E>> {
        let mut inner = self.lock();

        if inner.state == BreakerState::Open {
            let elapsed = inner
                .last_failure
                .map(|t| t.elapsed() >= self.config.reset_timeout())
                .unwrap_or(true);
            if !elapsed {
                inner.total_rejections += 1;
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
            inner.state = BreakerState::HalfOpen;
            inner.consecutive_successes = 0;
            tracing::info!(breaker = %self.name, "circuit half-open, allowing trial call");
        }

        let armed = if inner.state == BreakerState::HalfOpen {
            if inner.trial_in_flight {
                inner.total_rejections += 1;
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
            inner.trial_in_flight = true;
            true
        } else {
            false
        };

        inner.total_calls += 1;
        drop(inner);

        Ok(TrialPermit {
            breaker: self,
            armed,
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.trial_in_flight = false;
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.last_failure = None;
                    tracing::info!(breaker = %self.name, "circuit closed");
                }
            }
            // 打开期间不会有调用被放行；并发竞态下迟到的成功不改变状态
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.trial_in_flight = false;
        inner.consecutive_failures += 1;
        inner.consecutive_successes = 0;
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            BreakerState::Open => false,
        };
        if should_open {
            inner.state = BreakerState::Open;
            tracing::warn!(
                breaker = %self.name,
                consecutive_failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }

    /// 手动复位：回到 CLOSED 并清零全部计数
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::new();
        tracing::info!(breaker = %self.name, "circuit manually reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
            last_failure_ago_ms: inner
                .last_failure
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}
