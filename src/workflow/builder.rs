//! 工作流构建器
//!
//! 提供流畅的API来构建工作流；build 时校验步骤 ID 唯一、引用只指向更早的步骤。

use std::sync::Arc;

use serde_json::Value;

use crate::workflow::types::*;

/// 工作流构建器
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    steps: Vec<WorkflowStep>,
}

impl WorkflowBuilder {
    /// 创建新的工作流构建器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    /// 设置描述
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 追加步骤；inputs 为 JSON 对象，`$` 开头的字符串值解析为引用
    pub fn step(mut self, id: impl Into<StepId>, skill_id: impl Into<String>, inputs: Value) -> Self {
        let inputs = match inputs {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, StepInput::parse(v)))
                .collect(),
            _ => Vec::new(),
        };
        self.steps.push(WorkflowStep {
            id: id.into(),
            skill_id: skill_id.into(),
            inputs,
            guard: None,
        });
        self
    }

    /// 为最近追加的步骤添加派生输入
    pub fn derive<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&WorkflowContext) -> Option<Value> + Send + Sync + 'static,
    {
        if let Some(step) = self.steps.last_mut() {
            step.inputs.push((key.into(), StepInput::Derived(Arc::new(f))));
        }
        self
    }

    /// 为最近追加的步骤设置守卫条件
    pub fn when<F>(mut self, guard: F) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
    {
        if let Some(step) = self.steps.last_mut() {
            step.guard = Some(Arc::new(guard));
        }
        self
    }

    /// 构建工作流
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidConfiguration(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }

        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            if step.id.is_empty() || step.id == INPUT_REF {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "invalid step id '{}'",
                    step.id
                )));
            }
            if seen.contains(&step.id.as_str()) {
                return Err(WorkflowError::DuplicateStep(step.id.clone()));
            }
            for (_, input) in &step.inputs {
                if let StepInput::Ref { step: target, .. } = input {
                    if target != INPUT_REF && !seen.contains(&target.as_str()) {
                        return Err(WorkflowError::ForwardReference {
                            step: step.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
            seen.push(&step.id);
        }

        Ok(Workflow {
            name: self.name,
            description: self.description,
            steps: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_simple_workflow() {
        let workflow = WorkflowBuilder::new("Test Workflow")
            .description("A test workflow")
            .step("a", "feasibility_analysis", json!({"location": "$input.location"}))
            .step("b", "business_plan", json!({"base": "$a", "years": 5}))
            .when(|ctx| ctx.is_completed("a"))
            .build()
            .expect("Failed to build workflow");

        assert_eq!(workflow.name, "Test Workflow");
        assert_eq!(workflow.steps.len(), 2);
        assert!(workflow.steps[1].guard.is_some());
        assert_eq!(workflow.skill_ids(), vec!["feasibility_analysis", "business_plan"]);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let err = WorkflowBuilder::new("bad")
            .step("a", "x", json!({"v": "$b.field"}))
            .step("b", "y", json!({}))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::ForwardReference {
                step: "a".into(),
                target: "b".into()
            }
        );
    }

    #[test]
    fn test_duplicate_and_reserved_ids_rejected() {
        assert!(matches!(
            WorkflowBuilder::new("dup")
                .step("a", "x", json!({}))
                .step("a", "y", json!({}))
                .build(),
            Err(WorkflowError::DuplicateStep(_))
        ));
        assert!(WorkflowBuilder::new("reserved")
            .step("input", "x", json!({}))
            .build()
            .is_err());
        assert!(WorkflowBuilder::new("empty").build().is_err());
    }
}
