//! 工作流类型定义
//!
//! 工作流是一组严格顺序执行的技能调用。步骤输入可以是字面量、对前序步骤结果的引用（`$stepId.field`）
//! 或基于运行上下文的派生函数；步骤可带守卫条件，不满足时跳过（不算失败）。
//! 保留 ID `input` 指向工作流的初始参数（`$input.field`）。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::skills::ExecutionContext;

pub type StepId = String;

/// 初始参数的保留引用名
pub const INPUT_REF: &str = "input";

/// 派生输入：返回 None 表示省略该参数
pub type DeriveFn = Arc<dyn Fn(&WorkflowContext) -> Option<Value> + Send + Sync>;

/// 守卫条件
pub type GuardFn = Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>;

/// 步骤输入值
#[derive(Clone)]
pub enum StepInput {
    Literal(Value),
    /// `$step` 引用整个结果，`$step.a.b` 引用结果中的嵌套字段
    Ref { step: StepId, path: Vec<String> },
    Derived(DeriveFn),
}

impl StepInput {
    /// 以 `$` 开头的字符串解析为引用，其余为字面量
    pub fn parse(value: Value) -> Self {
        if let Value::String(s) = &value {
            if let Some(reference) = s.strip_prefix('$') {
                let mut parts = reference.split('.').map(str::to_string);
                if let Some(step) = parts.next().filter(|p| !p.is_empty()) {
                    return StepInput::Ref {
                        step,
                        path: parts.collect(),
                    };
                }
            }
        }
        StepInput::Literal(value)
    }
}

impl fmt::Debug for StepInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepInput::Literal(v) => write!(f, "Literal({})", v),
            StepInput::Ref { step, path } if path.is_empty() => write!(f, "Ref(${})", step),
            StepInput::Ref { step, path } => write!(f, "Ref(${}.{})", step, path.join(".")),
            StepInput::Derived(_) => write!(f, "Derived(..)"),
        }
    }
}

/// 工作流步骤
#[derive(Clone)]
pub struct WorkflowStep {
    pub id: StepId,
    pub skill_id: String,
    pub inputs: Vec<(String, StepInput)>,
    pub guard: Option<GuardFn>,
}

impl fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("id", &self.id)
            .field("skill_id", &self.skill_id)
            .field("inputs", &self.inputs)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// 工作流定义（由 WorkflowBuilder 构建并校验）
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// 涉及的技能 ID（去重，按出现顺序）
    pub fn skill_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.steps {
            if !out.contains(&s.skill_id.as_str()) {
                out.push(&s.skill_id);
            }
        }
        out
    }
}

/// 运行上下文：一次执行独占，执行结束即丢弃
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub initial: Map<String, Value>,
    pub exec: ExecutionContext,
    pub results: BTreeMap<StepId, Value>,
    pub completed_steps: Vec<StepId>,
    pub failed_steps: Vec<StepId>,
    pub skipped_steps: Vec<StepId>,
}

impl WorkflowContext {
    pub fn new(initial: Map<String, Value>, exec: ExecutionContext) -> Self {
        Self {
            initial,
            exec,
            results: BTreeMap::new(),
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            skipped_steps: Vec::new(),
        }
    }

    /// 初始参数字段
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.initial.get(key).filter(|v| !v.is_null())
    }

    /// 解析引用；目标步骤未完成或字段不存在时返回 None
    pub fn lookup(&self, step: &str, path: &[String]) -> Option<&Value> {
        let (root, rest) = if step == INPUT_REF {
            let (first, rest) = path.split_first()?;
            (self.initial.get(first)?, rest)
        } else {
            (self.results.get(step)?, path)
        };
        rest.iter().try_fold(root, |v, key| v.get(key.as_str()))
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }
}

/// 单步执行结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { step_id: StepId, result: Value },
    Failed { step_id: StepId, error: String },
    Skipped { step_id: StepId },
}

impl StepOutcome {
    pub fn step_id(&self) -> &str {
        match self {
            StepOutcome::Completed { step_id, .. }
            | StepOutcome::Failed { step_id, .. }
            | StepOutcome::Skipped { step_id } => step_id,
        }
    }
}

/// 工作流执行结果
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow: String,
    pub success: bool,
    pub completed_steps: Vec<StepId>,
    pub failed_steps: Vec<StepId>,
    pub skipped_steps: Vec<StepId>,
    pub results: BTreeMap<StepId, Value>,
    pub duration: Duration,
    pub error: Option<String>,
    pub outcomes: Vec<StepOutcome>,
    /// 已发出回滚通知的步骤（逆序）
    pub rolled_back: Vec<StepId>,
    pub cancelled: bool,
}

impl WorkflowResult {
    /// 供上下文追踪与记忆写入的紧凑 JSON
    pub fn summary_value(&self) -> Value {
        serde_json::json!({
            "workflow": self.workflow,
            "success": self.success,
            "completed_steps": self.completed_steps,
            "failed_steps": self.failed_steps,
            "cancelled": self.cancelled,
            "results": self.results,
        })
    }
}

/// 工作流错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow template not found: {0}")]
    UnknownTemplate(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' references '{target}', which is not an earlier step")]
    ForwardReference { step: String, target: String },

    #[error("Step '{step}' input '{input}' could not be resolved")]
    UnresolvedInput { step: String, input: String },

    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_step_input() {
        assert!(matches!(StepInput::parse(json!(3)), StepInput::Literal(_)));
        match StepInput::parse(json!("$feasibility.metrics.roi")) {
            StepInput::Ref { step, path } => {
                assert_eq!(step, "feasibility");
                assert_eq!(path, vec!["metrics", "roi"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(StepInput::parse(json!("$")), StepInput::Literal(_)));
    }

    #[test]
    fn test_lookup_input_and_results() {
        let mut ctx = WorkflowContext::new(
            json!({"location": "Turin", "nested": {"a": 1}})
                .as_object()
                .cloned()
                .unwrap(),
            ExecutionContext::new("u", "s"),
        );
        ctx.results.insert("f".into(), json!({"roi": 0.1}));
        assert_eq!(ctx.lookup("input", &["location".into()]), Some(&json!("Turin")));
        assert_eq!(ctx.lookup("input", &["nested".into(), "a".into()]), Some(&json!(1)));
        assert_eq!(ctx.lookup("f", &["roi".into()]), Some(&json!(0.1)));
        assert_eq!(ctx.lookup("f", &[]), Some(&json!({"roi": 0.1})));
        assert!(ctx.lookup("input", &[]).is_none());
        assert!(ctx.lookup("g", &[]).is_none());
    }
}
