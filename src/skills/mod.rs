//! 技能系统
//!
//! 技能（Skill）是一项可按 ID 调用的独立能力：声明输入 schema，接受校验后的参数执行。
//! 具体业务技能（可行性测算、商业计划、文档发送等）由调用方注册，核心只依赖 Skill trait：
//!
//! - SkillCatalog：按 ID 注册与查找，对外提供排序后的技能描述（写入模型提示）
//! - SkillExecutor：参数校验 + skills 熔断器 + 审计日志，同时作为工作流的步骤执行器

mod catalog;
mod echo;
mod executor;
mod schema;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use catalog::{SkillCatalog, SkillDescriptor};
pub use echo::EchoSkill;
pub use executor::SkillExecutor;
pub use schema::{FieldKind, FieldSpec, SchemaError, SkillSchema, ValidatedArgs};

/// 技能执行上下文
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    pub user_id: String,
    pub session_id: String,
    pub project_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            project_id: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

/// 技能执行失败
#[derive(Error, Debug, Clone)]
pub enum SkillError {
    #[error("{0}")]
    Failed(String),

    #[error("rejected input: {0}")]
    Rejected(String),
}

/// 技能 trait
#[async_trait]
pub trait Skill: Send + Sync {
    /// 技能 ID（模型调用与工作流步骤中引用的名字）
    fn id(&self) -> &str;

    /// 技能描述（供模型理解功能）
    fn description(&self) -> &str;

    fn input_schema(&self) -> SkillSchema;

    /// 是否为敏感技能（除静态策略列表外，技能也可自行声明）
    fn sensitive(&self) -> bool {
        false
    }

    async fn execute(&self, args: ValidatedArgs, ctx: &ExecutionContext) -> Result<Value, SkillError>;

    /// 工作流回滚通知（仅建议性质；是否补偿由技能自己决定）
    async fn notify_rollback(&self, step_id: &str, prior_result: &Value) {
        tracing::debug!(skill = self.id(), step = step_id, result = %prior_result, "rollback notice ignored");
    }
}
