//! 工作流引擎
//!
//! 步骤严格顺序执行，从不并发：
//! 1. 每步开始前检查取消令牌；已取消则停止（当前步骤不会被中途打断）
//! 2. 守卫为 false 的步骤跳过，不算失败
//! 3. 解析输入（字面量 / `$step.field` / 派生函数），经 StepRunner 调用技能
//! 4. 任一步失败：记录失败步骤，按逆序向已完成步骤发送回滚通知，整体以失败结束，不自动重试

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::CoreError;
use crate::skills::ExecutionContext;
use crate::workflow::types::*;

/// 步骤执行器 trait（由 SkillExecutor 实现，测试中可替换）
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        skill_id: &str,
        args: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, CoreError>;

    /// 回滚通知（建议性质）
    async fn rollback_step(&self, skill_id: &str, step_id: &str, prior_result: &Value);
}

/// 工作流引擎
pub struct WorkflowEngine {
    runner: Arc<dyn StepRunner>,
}

impl WorkflowEngine {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    /// 执行工作流；initial 为 `$input` 指向的初始参数
    pub async fn run(
        &self,
        workflow: &Workflow,
        initial: Map<String, Value>,
        exec: ExecutionContext,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let start = Instant::now();
        let mut ctx = WorkflowContext::new(initial, exec);
        let mut outcomes = Vec::with_capacity(workflow.steps.len());
        let mut error: Option<String> = None;
        let mut cancelled = false;

        tracing::info!(workflow = %workflow.name, steps = workflow.steps.len(), "workflow started");

        for step in &workflow.steps {
            if cancel.is_cancelled() {
                cancelled = true;
                error = Some(format!("cancelled before step '{}'", step.id));
                tracing::warn!(workflow = %workflow.name, step = %step.id, "workflow cancelled");
                break;
            }

            if let Some(guard) = &step.guard {
                if !guard(&ctx) {
                    tracing::debug!(workflow = %workflow.name, step = %step.id, "guard false, step skipped");
                    ctx.skipped_steps.push(step.id.clone());
                    outcomes.push(StepOutcome::Skipped {
                        step_id: step.id.clone(),
                    });
                    continue;
                }
            }

            let outcome = match resolve_inputs(step, &ctx) {
                Ok(args) => match self.runner.run_step(&step.skill_id, &args, &ctx.exec).await {
                    Ok(result) => StepOutcome::Completed {
                        step_id: step.id.clone(),
                        result,
                    },
                    Err(e) => StepOutcome::Failed {
                        step_id: step.id.clone(),
                        error: e.to_string(),
                    },
                },
                Err(e) => StepOutcome::Failed {
                    step_id: step.id.clone(),
                    error: e.to_string(),
                },
            };

            match &outcome {
                StepOutcome::Completed { step_id, result } => {
                    tracing::info!(workflow = %workflow.name, step = %step_id, "step completed");
                    ctx.results.insert(step_id.clone(), result.clone());
                    ctx.completed_steps.push(step_id.clone());
                }
                StepOutcome::Failed { step_id, error: e } => {
                    tracing::warn!(workflow = %workflow.name, step = %step_id, error = %e, "step failed");
                    ctx.failed_steps.push(step_id.clone());
                    error = Some(e.clone());
                }
                StepOutcome::Skipped { .. } => {}
            }
            let failed = matches!(outcome, StepOutcome::Failed { .. });
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let success = error.is_none();
        let mut rolled_back = Vec::new();
        if !success {
            for step_id in ctx.completed_steps.iter().rev() {
                let Some(step) = workflow.steps.iter().find(|s| &s.id == step_id) else {
                    continue;
                };
                let prior = ctx.results.get(step_id).cloned().unwrap_or(Value::Null);
                self.runner.rollback_step(&step.skill_id, step_id, &prior).await;
                rolled_back.push(step_id.clone());
            }
        }

        let duration = start.elapsed();
        tracing::info!(
            workflow = %workflow.name,
            success,
            completed = ctx.completed_steps.len(),
            failed = ctx.failed_steps.len(),
            duration_ms = duration.as_millis() as u64,
            "workflow finished"
        );

        WorkflowResult {
            workflow: workflow.name.clone(),
            success,
            completed_steps: ctx.completed_steps,
            failed_steps: ctx.failed_steps,
            skipped_steps: ctx.skipped_steps,
            results: ctx.results,
            duration,
            error,
            outcomes,
            rolled_back,
            cancelled,
        }
    }
}

fn resolve_inputs(step: &WorkflowStep, ctx: &WorkflowContext) -> Result<Value, WorkflowError> {
    let mut args = Map::new();
    for (key, input) in &step.inputs {
        match input {
            StepInput::Literal(v) => {
                args.insert(key.clone(), v.clone());
            }
            StepInput::Ref { step: target, path } => {
                let value = ctx
                    .lookup(target, path)
                    .ok_or_else(|| WorkflowError::UnresolvedInput {
                        step: step.id.clone(),
                        input: key.clone(),
                    })?;
                args.insert(key.clone(), value.clone());
            }
            StepInput::Derived(f) => {
                if let Some(v) = f(ctx) {
                    args.insert(key.clone(), v);
                }
            }
        }
    }
    Ok(Value::Object(args))
}
