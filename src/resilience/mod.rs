//! 韧性层：熔断器（每个外部依赖一个）与响应缓存（进程内共享）

pub mod cache;
pub mod circuit_breaker;

use std::sync::Arc;

pub use cache::{cache_key, normalize, similarity, CacheMetrics, ResponseCache};
pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerSnapshot, BreakerState, CircuitBreaker,
};

use crate::config::ResilienceSection;

/// 三类外部依赖各自的熔断器，由 Orchestrator 构建并向下传递
#[derive(Clone)]
pub struct BreakerSet {
    pub llm: Arc<CircuitBreaker>,
    pub memory: Arc<CircuitBreaker>,
    pub skills: Arc<CircuitBreaker>,
}

impl BreakerSet {
    pub fn from_config(cfg: &ResilienceSection) -> Self {
        Self {
            llm: Arc::new(CircuitBreaker::new("llm", cfg.llm.clone())),
            memory: Arc::new(CircuitBreaker::new("memory", cfg.memory.clone())),
            skills: Arc::new(CircuitBreaker::new("skills", cfg.skills.clone())),
        }
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        vec![
            self.llm.snapshot(),
            self.memory.snapshot(),
            self.skills.snapshot(),
        ]
    }
}

impl Default for BreakerSet {
    fn default() -> Self {
        Self::from_config(&ResilienceSection::default())
    }
}
