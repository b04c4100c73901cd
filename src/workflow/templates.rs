//! 命名工作流模板
//!
//! 工作流决策只给出模板名与参数，参数作为 `$input` 注入；模板本身在启动时构建一次。

use std::collections::HashMap;

use serde_json::json;

use crate::workflow::{Workflow, WorkflowBuilder, WorkflowError};

pub const FULL_ANALYSIS: &str = "full_analysis";
pub const FEASIBILITY_WITH_SENSITIVITY: &str = "feasibility_with_sensitivity";

#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    templates: HashMap<String, Workflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置模板
    pub fn builtin() -> Result<Self, WorkflowError> {
        let mut registry = Self::new();
        registry.register(full_analysis()?);
        registry.register(feasibility_with_sensitivity()?);
        Ok(registry)
    }

    pub fn register(&mut self, workflow: Workflow) {
        self.templates.insert(workflow.name.clone(), workflow);
    }

    pub fn get(&self, name: &str) -> Result<&Workflow, WorkflowError> {
        self.templates
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownTemplate(name.to_string()))
    }

    /// 模板名（排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    /// 写入模型提示的模板说明
    pub fn describe(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|n| {
                let wf = self.templates.get(&n)?;
                Some((n, wf.description.clone().unwrap_or_default()))
            })
            .collect()
    }
}

/// 可行性 → 商业计划 → 保存（仅当给出项目名时保存）
fn full_analysis() -> Result<Workflow, WorkflowError> {
    WorkflowBuilder::new(FULL_ANALYSIS)
        .description("Feasibility study, then business plan, then save as a project when a project_name is given. Arguments: location (required), budget, project_name.")
        .step("feasibility", "feasibility_analysis", json!({"location": "$input.location"}))
        .derive("budget", |ctx| ctx.input("budget").cloned())
        .step(
            "business_plan",
            "business_plan",
            json!({"location": "$input.location", "feasibility": "$feasibility"}),
        )
        .step(
            "save",
            "project_save",
            json!({"project_name": "$input.project_name", "business_plan": "$business_plan"}),
        )
        .when(|ctx| ctx.input("project_name").is_some())
        .build()
}

/// 可行性 → 敏感性分析
fn feasibility_with_sensitivity() -> Result<Workflow, WorkflowError> {
    WorkflowBuilder::new(FEASIBILITY_WITH_SENSITIVITY)
        .description("Feasibility study followed by a sensitivity analysis on its result. Arguments: location (required), budget, variation.")
        .step("feasibility", "feasibility_analysis", json!({"location": "$input.location"}))
        .derive("budget", |ctx| ctx.input("budget").cloned())
        .step("sensitivity", "sensitivity_analysis", json!({"base": "$feasibility"}))
        .derive("variation", |ctx| {
            Some(ctx.input("variation").cloned().unwrap_or_else(|| json!(0.1)))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates() {
        let registry = WorkflowRegistry::builtin().unwrap();
        assert_eq!(registry.names(), vec![FEASIBILITY_WITH_SENSITIVITY, FULL_ANALYSIS]);
        let wf = registry.get(FULL_ANALYSIS).unwrap();
        assert_eq!(
            wf.skill_ids(),
            vec!["feasibility_analysis", "business_plan", "project_save"]
        );
        assert!(wf.steps[2].guard.is_some());
        assert!(matches!(
            registry.get("nope"),
            Err(WorkflowError::UnknownTemplate(_))
        ));
    }
}
