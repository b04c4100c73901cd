//! Echo 技能（本地运行与测试用）

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ExecutionContext, FieldKind, FieldSpec, Skill, SkillError, SkillSchema, ValidatedArgs};

/// Echo 技能：回显文本
pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn id(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back to the user (diagnostics)."
    }

    fn input_schema(&self) -> SkillSchema {
        SkillSchema::new().field(FieldSpec::required("text", FieldKind::String, "text to echo"))
    }

    async fn execute(&self, args: ValidatedArgs, _ctx: &ExecutionContext) -> Result<Value, SkillError> {
        let text = args.str("text").unwrap_or("(empty)");
        Ok(json!({ "text": text }))
    }
}
