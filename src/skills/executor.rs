//! 技能执行器
//!
//! 持有 SkillCatalog 与 skills 熔断器：execute(skill_id, args) 先按 schema 校验，再经熔断器（含超时）调用，
//! 失败统一转为 CoreError；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::CoreError;
use crate::resilience::{BreakerError, CircuitBreaker};
use crate::workflow::StepRunner;

use super::{ExecutionContext, SkillCatalog};

pub struct SkillExecutor {
    catalog: Arc<SkillCatalog>,
    breaker: Arc<CircuitBreaker>,
}

impl SkillExecutor {
    pub fn new(catalog: Arc<SkillCatalog>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { catalog, breaker }
    }

    pub fn catalog(&self) -> &Arc<SkillCatalog> {
        &self.catalog
    }

    /// 执行指定技能；输出 JSON 审计日志
    pub async fn execute(
        &self,
        skill_id: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, CoreError> {
        let start = Instant::now();
        let preview = args_preview(args);

        let result = self.execute_inner(skill_id, args, ctx).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(CoreError::Timeout { .. }) => (false, "timeout"),
            Err(CoreError::CircuitOpen(_)) => (false, "rejected"),
            Err(CoreError::Schema { .. }) | Err(CoreError::UnknownSkill(_)) => (false, "invalid"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "skill_audit",
            "skill": skill_id,
            "session": ctx.session_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "skill");

        result
    }

    async fn execute_inner(
        &self,
        skill_id: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, CoreError> {
        let skill = self
            .catalog
            .get(skill_id)
            .ok_or_else(|| CoreError::UnknownSkill(skill_id.to_string()))?;
        let validated = skill
            .input_schema()
            .validate(args)
            .map_err(|source| CoreError::Schema {
                skill: skill_id.to_string(),
                source,
            })?;

        self.breaker
            .call(|| async move { skill.execute(validated, ctx).await })
            .await
            .map_err(|e: BreakerError<_>| {
                CoreError::from_breaker(e, |inner| CoreError::SkillFailed {
                    skill: skill_id.to_string(),
                    message: inner.to_string(),
                })
            })
    }

    /// 回滚通知；技能不存在时仅记录
    pub async fn notify_rollback(&self, skill_id: &str, step_id: &str, prior_result: &Value) {
        match self.catalog.get(skill_id) {
            Some(skill) => {
                tracing::info!(skill = skill_id, step = step_id, "rollback notification");
                skill.notify_rollback(step_id, prior_result).await;
            }
            None => tracing::warn!(skill = skill_id, step = step_id, "rollback target not registered"),
        }
    }
}

#[async_trait]
impl StepRunner for SkillExecutor {
    async fn run_step(
        &self,
        skill_id: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, CoreError> {
        self.execute(skill_id, args, ctx).await
    }

    async fn rollback_step(&self, skill_id: &str, step_id: &str, prior_result: &Value) {
        self.notify_rollback(skill_id, step_id, prior_result).await;
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
