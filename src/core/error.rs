//! 核心错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 CoreError 决定回退回复 / 澄清 / 请求确认 / 终止。
//! 只有启动期的配置错误是致命的，其余错误都在组件边界被转换为结构化结果。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::MemoryError;
use crate::resilience::BreakerError;
use crate::skills::SchemaError;
use crate::workflow::WorkflowError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Invalid arguments for '{skill}': {source}")]
    Schema {
        skill: String,
        #[source]
        source: SchemaError,
    },

    #[error("Skill '{skill}' failed: {message}")]
    SkillFailed { skill: String, message: String },

    #[error("Dependency '{dependency}' timed out after {after_ms}ms")]
    Timeout { dependency: String, after_ms: u64 },

    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Turn cancelled")]
    Cancelled,
}

impl CoreError {
    /// 熔断器错误转换：Open / Timeout 统一映射，内部错误交给 inner
    pub fn from_breaker<E>(err: BreakerError<E>, inner: impl FnOnce(E) -> CoreError) -> Self {
        match err {
            BreakerError::Open { name } => CoreError::CircuitOpen(name),
            BreakerError::Timeout { name, after_ms } => CoreError::Timeout {
                dependency: name,
                after_ms,
            },
            BreakerError::Inner(e) => inner(e),
        }
    }

    /// 外部依赖失败（可恢复，用户看到回退回复）
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout { .. }
                | CoreError::CircuitOpen(_)
                | CoreError::Llm(_)
                | CoreError::Memory(_)
                | CoreError::SkillFailed { .. }
        )
    }
}

impl<E> From<BreakerError<E>> for CoreError
where
    E: Into<CoreError>,
{
    fn from(err: BreakerError<E>) -> Self {
        CoreError::from_breaker(err, Into::into)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 用平实语言的回退回复结束本轮
    Fallback(String),
    /// 请用户补充或修正信息
    Clarify(String),
    /// 终止本轮（配置错误等不可恢复情况）
    Abort(String),
}

impl RecoveryAction {
    pub fn message(&self) -> &str {
        match self {
            RecoveryAction::Fallback(m) | RecoveryAction::Clarify(m) | RecoveryAction::Abort(m) => m,
        }
    }
}
