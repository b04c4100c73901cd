//! 集成测试共用：假业务技能与装配辅助

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use concierge::config::AppConfig;
use concierge::core::{Orchestrator, OrchestratorBuilder};
use concierge::llm::LlmClient;
use concierge::skills::{
    ExecutionContext, FieldKind, FieldSpec, Skill, SkillError, SkillSchema, ValidatedArgs,
};
use serde_json::{json, Value};

/// 技能调用与回滚通知的记录
#[derive(Debug, Default, Clone)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// 按 ID 配置的假技能：记录调用，返回固定结果或失败
pub struct FakeSkill {
    id: &'static str,
    schema: SkillSchema,
    sensitive: bool,
    fail_with: Option<String>,
    journal: Journal,
}

impl FakeSkill {
    pub fn new(id: &'static str, schema: SkillSchema, journal: &Journal) -> Self {
        Self {
            id,
            schema,
            sensitive: false,
            fail_with: None,
            journal: journal.clone(),
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.fail_with = Some(error.into());
        self
    }
}

#[async_trait]
impl Skill for FakeSkill {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        "test skill"
    }

    fn input_schema(&self) -> SkillSchema {
        self.schema.clone()
    }

    fn sensitive(&self) -> bool {
        self.sensitive
    }

    async fn execute(&self, args: ValidatedArgs, _ctx: &ExecutionContext) -> Result<Value, SkillError> {
        self.journal.push(format!("run:{}", self.id));
        if let Some(e) = &self.fail_with {
            return Err(SkillError::Failed(e.clone()));
        }
        let location = args.str("location").unwrap_or("-").to_string();
        Ok(match self.id {
            "feasibility_analysis" => json!({"location": location, "npv": 120000, "roi": 0.14}),
            "business_plan" => json!({"location": location, "revenue_y1": 450000}),
            "project_save" => json!({
                "message": format!("Saved project {}", args.str("project_name").unwrap_or("?")),
            }),
            "location_compare" => json!({"locations": args.get("locations").cloned(), "winner": "Milan"}),
            "document_send" => json!({"message": "Document sent"}),
            _ => args.to_value(),
        })
    }

    async fn notify_rollback(&self, step_id: &str, _prior_result: &Value) {
        self.journal.push(format!("rollback:{}", step_id));
    }
}

fn located() -> SkillSchema {
    SkillSchema::new()
        .field(FieldSpec::required("location", FieldKind::String, "city or municipality"))
        .allow_extra()
}

pub fn feasibility(journal: &Journal) -> FakeSkill {
    FakeSkill::new("feasibility_analysis", located(), journal)
}

pub fn business_plan(journal: &Journal) -> FakeSkill {
    FakeSkill::new("business_plan", located(), journal)
}

pub fn project_save(journal: &Journal) -> FakeSkill {
    FakeSkill::new(
        "project_save",
        SkillSchema::new()
            .field(FieldSpec::required("project_name", FieldKind::String, "project name"))
            .allow_extra(),
        journal,
    )
}

pub fn location_compare(journal: &Journal) -> FakeSkill {
    FakeSkill::new(
        "location_compare",
        SkillSchema::new().field(FieldSpec::required("locations", FieldKind::Array, "locations to compare")),
        journal,
    )
}

pub fn document_send(journal: &Journal) -> FakeSkill {
    FakeSkill::new(
        "document_send",
        SkillSchema::new()
            .field(FieldSpec::required("to", FieldKind::String, "recipient"))
            .allow_extra(),
        journal,
    )
}

/// 测试配置：进程内记忆、无清扫干扰
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.memory.backend = "memory".into();
    cfg.memory.exclusion_window_secs = 0;
    cfg
}

/// 注册全部业务技能的 Orchestrator
pub fn orchestrator(cfg: AppConfig, llm: Arc<dyn LlmClient>, journal: &Journal) -> Orchestrator {
    OrchestratorBuilder::new(cfg)
        .with_llm(llm)
        .with_skill(feasibility(journal))
        .with_skill(business_plan(journal))
        .with_skill(project_save(journal))
        .with_skill(location_compare(journal))
        .with_skill(document_send(journal))
        .build()
        .unwrap()
}
