//! 技能目录
//!
//! 按 ID 存储 Arc<dyn Skill>，支持 register / get / validate / descriptors。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::{SchemaError, Skill, ValidatedArgs};

/// 写入模型提示的技能描述
#[derive(Debug, Clone, Serialize)]
pub struct SkillDescriptor {
    pub id: String,
    pub description: String,
    pub schema: Value,
    pub sensitive: bool,
}

#[derive(Default)]
pub struct SkillCatalog {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, skill: impl Skill + 'static) {
        self.register_arc(Arc::new(skill));
    }

    pub fn register_arc(&mut self, skill: Arc<dyn Skill>) {
        let id = skill.id().to_string();
        if self.skills.insert(id.clone(), skill).is_some() {
            tracing::warn!(skill = %id, "skill re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// 已注册 ID（排序，保证提示内容稳定）
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.skills.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 按目录中该技能声明的 schema 校验参数
    pub fn validate(&self, id: &str, args: &Value) -> Result<ValidatedArgs, SchemaError> {
        let skill = self
            .skills
            .get(id)
            .ok_or_else(|| SchemaError::UnknownSkill(id.to_string()))?;
        skill.input_schema().validate(args)
    }

    pub fn descriptors(&self) -> Vec<SkillDescriptor> {
        let mut out: Vec<SkillDescriptor> = self
            .skills
            .values()
            .map(|s| SkillDescriptor {
                id: s.id().to_string(),
                description: s.description().to_string(),
                schema: s.input_schema().to_json_schema(),
                sensitive: s.sensitive(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}
